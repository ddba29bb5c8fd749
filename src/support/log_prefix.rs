//-
// Copyright (c) 2023, 2024, Jason Lingle
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

use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included in at the start of every log statement.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    protocol: String,
    peer: Option<SocketAddr>,
    user: Option<String>,
    user_agent: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer: None,
                user: None,
                user_agent: None,
            })),
        }
    }

    pub fn set_peer(&self, peer: SocketAddr) {
        self.inner.lock().unwrap().peer = Some(peer);
    }

    pub fn set_user(&self, user: String) {
        self.inner.lock().unwrap().user = Some(sanitise(user));
    }

    pub fn set_user_agent(&self, user_agent: String) {
        self.inner.lock().unwrap().user_agent = Some(sanitise(user_agent));
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.protocol)?;
        if let Some(peer) = inner.peer {
            write!(f, ":{peer}")?;
        }

        if inner.user.is_some() || inner.user_agent.is_some() {
            write!(f, "[")?;
            let mut first = true;
            if let Some(ref user) = inner.user {
                write!(f, "{user}")?;
                first = false;
            }

            if let Some(ref user_agent) = inner.user_agent {
                if !mem::take(&mut first) {
                    write!(f, " ")?;
                }
                write!(f, "agent={user_agent}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefix_format() {
        let prefix = LogPrefix::new("jmap".to_owned());
        assert_eq!("jmap", prefix.to_string());

        let clone = prefix.clone();
        clone.set_peer("127.0.0.1:4321".parse().unwrap());
        assert_eq!("jmap:127.0.0.1:4321", prefix.to_string());

        prefix.set_user_agent("curl/8.0".to_owned());
        assert_eq!("jmap:127.0.0.1:4321[agent=curl/8.0]", prefix.to_string());

        prefix.set_user("az\nure".to_owned());
        assert_eq!(
            "jmap:127.0.0.1:4321[azure agent=curl/8.0]",
            prefix.to_string()
        );
    }

    #[test]
    fn long_values_are_truncated() {
        let prefix = LogPrefix::new("jmap".to_owned());
        prefix.set_user("x".repeat(100));
        assert_eq!(4 + 2 + 64, prefix.to_string().len());
    }
}
