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

use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::account::memory::MemoryDirectory;
use crate::support::diagnostic;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Commands to be run on the server system.
    Server(ServerSubcommand),
}

#[derive(StructOpt, Default)]
pub(super) struct ServerCommonOptions {
    /// The directory containing `jmapd.toml` etc
    /// [default: /etc/crymap-jmap or /usr/local/etc/crymap-jmap]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,
}

#[derive(StructOpt)]
enum ServerSubcommand {
    /// Run the JMAP server in the foreground.
    ///
    /// The server listens on the address given in the `[http]` section of
    /// `jmapd.toml` and runs until interrupted.
    Serve(ServerCommonOptions),
    /// Load the configuration, report any problems, then exit.
    CheckConfig(ServerCommonOptions),
    /// Prompt for a password and print its hash.
    ///
    /// The output is suitable for the `password_hash` field of a user in
    /// `jmapd.toml`.
    HashPassword,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        Command::Server(cmd) => server(cmd),
    }
}

fn server(cmd: ServerSubcommand) {
    let common = match cmd {
        ServerSubcommand::HashPassword => {
            super::user::hash_password();
            return;
        }
        ServerSubcommand::Serve(ref c) | ServerSubcommand::CheckConfig(ref c) => {
            c
        }
    };

    let root = common.root.clone().unwrap_or_else(|| {
        if Path::new("/etc/crymap-jmap/jmapd.toml").is_file() {
            "/etc/crymap-jmap".to_owned().into()
        } else if Path::new("/usr/local/etc/crymap-jmap/jmapd.toml").is_file()
        {
            "/usr/local/etc/crymap-jmap".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/crymap-jmap nor /usr/local/etc/crymap-jmap\n\
                 looks like the server root; use --root=/path/to/root if\n\
                 your installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let system_config_path = root.join("jmapd.toml");
    let system_config = match SystemConfig::load(&system_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error loading config file at '{}': {}",
                system_config_path.display(),
                e
            );
            EX_CONFIG.exit()
        }
    };

    // Building the directory runs every cross-reference check on the
    // configuration.
    if let Err(e) = MemoryDirectory::new(&system_config) {
        eprintln!(
            "Error in config file at '{}': {}",
            system_config_path.display(),
            e
        );
        EX_CONFIG.exit();
    }

    if let ServerSubcommand::CheckConfig(_) = cmd {
        println!(
            "'{}' is valid: {} user(s), {} account(s)",
            system_config_path.display(),
            system_config.users.len(),
            system_config.accounts.len()
        );
        return;
    }

    if let Err(exit) =
        diagnostic::apply_diagnostics(&root, &system_config.diagnostic)
    {
        exit.exit();
    }

    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
    } else {
        // log4rs if there is a logging configuration, syslog otherwise.
        let log_config_file = root.join("logging.toml");
        if log_config_file.is_file() {
            log4rs::init_file(
                log_config_file,
                log4rs::config::Deserializers::new(),
            )
            .expect("Failed to initialise logging");
        } else {
            let formatter = syslog::Formatter3164 {
                facility: syslog::Facility::LOG_DAEMON,
                hostname: None,
                process: env!("CARGO_PKG_NAME").to_owned(),
                pid: nix::unistd::getpid().as_raw(),
            };

            let logger =
                syslog::unix(formatter).expect("Failed to connect to syslog");
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|_| log::set_max_level(log::LevelFilter::Info))
                .expect("Failed to initialise logging");
        }
    }

    super::serve::serve(system_config);
}
