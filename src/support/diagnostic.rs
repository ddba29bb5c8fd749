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

//! Process-level settings applied after the configuration is loaded and
//! before logging starts.

use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use super::sysexits::*;
use super::system_config::DiagnosticConfig;

const STDERR: i32 = 2;

/// Apply the `[diagnostic]` section of the configuration.
///
/// Relative paths are resolved against `root`. On failure, a message has
/// been written to the original stderr and the exit code to use is returned.
pub fn apply_diagnostics(
    root: &Path,
    config: &DiagnosticConfig,
) -> Result<(), Sysexit> {
    if let Some(ref stderr_path) = config.stderr {
        redirect_stderr(&root.join(stderr_path))?;
    }

    Ok(())
}

fn redirect_stderr(path: &Path) -> Result<(), Sysexit> {
    let file = match fs::OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o640)
        .open(path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "Failed to redirect stderr to '{}': {}",
                path.display(),
                e
            );
            return Err(EX_CANTCREAT);
        }
    };

    // The duplicate keeps the file open after `file` is dropped.
    if let Err(e) = nix::unistd::dup2(file.as_raw_fd(), STDERR) {
        eprintln!("Failed to redirect stderr: dup2: {}", e);
        return Err(EX_OSERR);
    }

    Ok(())
}
