//! Demo command implementation.
//!
//! Opens a file-backed client store, pairs it with a file-backed server and
//! keeps both in sync while the user edits a customer from stdin. Both
//! stores keep their peer IDs across runs, so the client tracks a single
//! remote peer.

use super::{customer, customer_schema, CUSTOMER};
use rand::Rng;
use rowsync_engine::{
    Orchestrator, RemotePeer, ResolutionPolicy, RunnerConfig, ServerPeer, SessionConfig,
    SessionRunner,
};
use rowsync_protocol::{RowKey, Value};
use rowsync_server::{ServerConfig, SyncServer};
use rowsync_store::{Store, StoreResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Options for the demo command.
pub struct DemoOptions {
    /// Server store file.
    pub server_path: PathBuf,
    /// Time between scheduled sessions.
    pub interval: Duration,
    /// Whether the server renames the customer on its own.
    pub server_edits: bool,
    /// Conflict resolution policy.
    pub policy: ResolutionPolicy,
}

/// Default server store file for a client store at `path`.
pub fn server_path_for(path: &Path) -> PathBuf {
    path.with_extension("server.json")
}

/// Client store, server store and the orchestrator between them.
struct Stores {
    client: Arc<Store>,
    server: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
}

impl Stores {
    fn open(path: &Path, server_path: &Path) -> StoreResult<Self> {
        let client = Arc::new(Store::open(path)?);
        client.create_table(customer_schema())?;

        let server_store = Arc::new(Store::open(server_path)?);
        server_store.create_table(customer_schema())?;
        let server = Arc::new(SyncServer::new(Arc::clone(&server_store), ServerConfig::default()));
        let peer: Arc<dyn RemotePeer> = Arc::new(ServerPeer::new(server));
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&client), peer));
        Ok(Self {
            client,
            server: server_store,
            orchestrator,
        })
    }

    fn close(&self) -> StoreResult<()> {
        self.client.close()?;
        self.server.close()
    }
}

/// Runs the demo command.
pub async fn run(path: &Path, options: DemoOptions) -> Result<(), Box<dyn std::error::Error>> {
    if path == options.server_path.as_path() {
        return Err("Server store path must differ from the client store path".into());
    }
    let stores = Stores::open(path, &options.server_path)?;
    let client = Arc::clone(&stores.client);
    let server_store = Arc::clone(&stores.server);
    let orchestrator = Arc::clone(&stores.orchestrator);

    let session = SessionConfig::new([CUSTOMER]).with_policy(options.policy);
    println!("Client {} syncing with server {}", client.peer_id(), server_store.peer_id());

    let initial = orchestrator.synchronize(&session).await;
    println!("{initial}");
    if client.count(CUSTOMER)? == 0 {
        client.transaction(|txn| txn.insert(CUSTOMER, 1, customer("John", "Doe")))?;
        println!("Seeded customer John Doe");
    }
    print_customers(&client)?;

    let config = RunnerConfig::new(session).with_interval(options.interval);
    let (runner, handle) = SessionRunner::spawn(Arc::clone(&orchestrator), config);

    let editor = options.server_edits.then(|| {
        let store = Arc::clone(&server_store);
        let period = options.interval / 2;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                match rename(&store, "Server") {
                    Ok(Some((key, last))) => info!(%key, last_name = %last, "server renamed customer"),
                    Ok(None) => {}
                    Err(error) => warn!(%error, "server edit failed"),
                }
            }
        })
    });

    println!("Press Enter to rename the customer and sync, q to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }
        if let Some((key, last)) = rename(&client, "Doe")? {
            println!("Customer {key} renamed to {last}");
        }
        let report = handle.request_sync().await?;
        println!("{report}");
        print_customers(&client)?;
    }

    if let Some(editor) = editor {
        editor.abort();
    }
    handle.shutdown().await;
    runner.await?;

    let stats = orchestrator.stats();
    println!(
        "{} sessions completed, {} aborted, {} conflicts",
        stats.sessions_completed, stats.sessions_aborted, stats.conflicts
    );
    stores.close()?;
    Ok(())
}

/// Gives the first customer a new random last name.
fn rename(store: &Store, prefix: &str) -> StoreResult<Option<(RowKey, String)>> {
    let Some(row) = store.rows(CUSTOMER)?.into_iter().next() else {
        return Ok(None);
    };
    let first = match row.get("FirstName") {
        Some(Value::Text(name)) => name.clone(),
        _ => String::from("John"),
    };
    let last = format!("{prefix}_{}", rand::thread_rng().gen_range(1000..10000));
    store.transaction(|txn| txn.update(CUSTOMER, row.key.clone(), customer(&first, &last)))?;
    Ok(Some((row.key, last)))
}

fn print_customers(store: &Store) -> StoreResult<()> {
    for row in store.rows(CUSTOMER)? {
        let text = |column: &str| match row.get(column) {
            Some(value) => value.to_string(),
            None => String::new(),
        };
        println!("  {} {} {}", row.key, text("FirstName"), text("LastName"));
    }
    Ok(())
}
