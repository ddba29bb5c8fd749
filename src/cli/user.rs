//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

use rand::{rngs::OsRng, Rng};

pub fn hash_password() {
    let password = match rpassword::prompt_password("Password: ").and_then(|a| {
        rpassword::prompt_password("Confirm: ").map(|b| (a, b))
    }) {
        Err(e) => die!(EX_NOINPUT, "Failed to read password: {}", e),
        Ok((a, b)) if a != b => die!(EX_DATAERR, "Passwords don't match"),
        Ok((a, _)) if a.is_empty() => die!(EX_NOINPUT, "No password given"),
        Ok((a, _)) => a,
    };

    match hash(&password) {
        Ok(hash) => println!("{}", hash),
        Err(e) => die!(EX_SOFTWARE, "Failed to hash password: {}", e),
    }
}

fn hash(password: &str) -> Result<String, argon2::Error> {
    let salt: [u8; 16] = OsRng.gen();
    argon2::hash_encoded(
        password.as_bytes(),
        &salt,
        &argon2::Config {
            variant: argon2::Variant::Argon2id,
            ..argon2::Config::default()
        },
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hashes_verify_and_are_salted() {
        let a = hash("hunter2").unwrap();
        let b = hash("hunter2").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(argon2::verify_encoded(&a, b"hunter2").unwrap());
        assert!(!argon2::verify_encoded(&b, b"hunter3").unwrap());
    }
}
