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

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use serde_json::json;

use crate::account::mailbox::MailboxType;
use crate::account::memory::{AccountHandle, MemoryDirectory};
use crate::jmap::capability::{Capability, Registry, MAIL};
use crate::jmap::dispatcher::Dispatcher;
use crate::jmap::method::Datatype;
use crate::jmap::server::{router, ConfigAuthenticator};
use crate::jmap::session::SessionUrls;
use crate::support::system_config::SystemConfig;

// Like die!, but reports through the logger
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

/// The `urn:ietf:params:jmap:mail` capability with the datatypes of the
/// bundled store.
fn mail_capability() -> Capability<AccountHandle> {
    Capability::new(
        MAIL,
        json!({}),
        vec![Box::new(MailboxType) as Box<dyn Datatype<AccountHandle>>],
    )
    .with_account_info(json!({
        "maxMailboxesPerEmail": null,
        "maxMailboxDepth": null,
        "maxSizeMailboxName": 255,
        "maxSizeAttachmentsPerEmail": 0,
        "emailQuerySortOptions": [],
        "mayCreateTopLevelMailbox": true,
    }))
}

pub fn serve(system_config: SystemConfig) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => fatal!(EX_OSERR, "Failed to start async runtime: {}", e),
    };

    runtime.block_on(run(system_config));
}

async fn run(system_config: SystemConfig) {
    let directory = match MemoryDirectory::new(&system_config) {
        Ok(directory) => directory,
        Err(e) => fatal!(EX_CONFIG, "Invalid configuration: {}", e),
    };

    let registry =
        match Registry::new(system_config.core.clone(), vec![mail_capability()])
        {
            Ok(registry) => registry,
            Err(e) => fatal!(EX_SOFTWARE, "Failed to set up capabilities: {}", e),
        };

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Arc::new(directory),
        SessionUrls::from_config(&system_config.http),
    ));
    let app = router(
        dispatcher,
        Arc::new(ConfigAuthenticator::new(&system_config)),
        &system_config.http.api_path,
    );

    let bind = system_config.http.bind;
    let listener = match tokio::net::TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(e) => fatal!(EX_UNAVAILABLE, "Unable to listen on {}: {}", bind, e),
    };
    info!("Listening on {}", bind);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        fatal!(EX_IOERR, "Server failed: {}", e);
    }

    info!("Shut down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for interrupts: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Interrupted; waiting for requests in progress to finish");
}
