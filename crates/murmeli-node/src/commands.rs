//! One function per subcommand.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use murmeli_protocol::{
    ContactProfile, ContactStatus, DispatcherKind, FlushOutcome, Keyring, LocalKeyring, Node,
    ProtocolConfig, SqliteStore, Store,
};
use murmeli_transport::{FrameListener, OnionSender, PeerId};

use crate::config::{DataDir, Identity, NodeConfig, TransportSection};
use crate::output;

/// How often a running node writes learned keys to disk.
const KEYRING_SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Everything a command needs, opened from the data directory.
pub struct Env {
    pub data: DataDir,
    pub config: NodeConfig,
    pub store: Arc<SqliteStore>,
    pub keyring: Arc<LocalKeyring>,
    pub node: Arc<Node>,
}

impl Env {
    pub fn open(data: DataDir) -> anyhow::Result<Self> {
        let config = NodeConfig::load(&data.config())?;
        let keyring = Arc::new(LocalKeyring::load(&data.keyring())?);
        let store = Arc::new(SqliteStore::open(&data.database())?);
        if store.own_profile()?.is_none() {
            store.add_or_update_profile(own_profile(&config.identity, keyring.as_ref()))?;
        }

        let transport = OnionSender::new(config.transport.to_config());
        let node = Node::new(
            store.clone(),
            keyring.clone(),
            config.protocol.clone(),
            Arc::new(transport),
        );
        Ok(Self {
            data,
            config,
            store,
            keyring,
            node: Arc::new(node),
        })
    }

    pub fn save_keyring(&self) -> anyhow::Result<()> {
        self.keyring.save(&self.data.keyring())?;
        Ok(())
    }

    fn contact(&self, id: &PeerId) -> anyhow::Result<ContactProfile> {
        self.store
            .get_profile(id)?
            .with_context(|| format!("{id} is not in the contact list"))
    }
}

fn own_profile(identity: &Identity, keyring: &dyn Keyring) -> ContactProfile {
    let mut own = ContactProfile::new(identity.id.clone(), ContactStatus::Myself, &identity.name);
    own.name = identity.name.clone();
    own.key_id = Some(keyring.own_key_id());
    own
}

// ── Setup ─────────────────────────────────────────────────────────────

pub struct InitOptions {
    pub id: PeerId,
    pub name: String,
    pub dispatcher: DispatcherKind,
    /// Exported public key of the owner, for robots.
    pub owner_key: Option<String>,
    pub listen: Option<std::net::SocketAddr>,
    pub force: bool,
}

pub fn init(data: &DataDir, opts: InitOptions) -> anyhow::Result<()> {
    if data.config().exists() && !opts.force {
        bail!("{} already exists (use --force to overwrite)", data.config().display());
    }
    std::fs::create_dir_all(data.root())
        .with_context(|| format!("cannot create {}", data.root().display()))?;

    let keyring = LocalKeyring::generate();
    let mut protocol = ProtocolConfig::default().dispatcher(opts.dispatcher);
    if let Some(owner) = &opts.owner_key {
        let key_id = keyring
            .import_public_key(owner)
            .context("owner key is not a valid public key")?;
        protocol = protocol
            .dispatcher(DispatcherKind::Robot)
            .robot_owner_key_id(key_id);
    }
    let mut transport = TransportSection::default();
    if let Some(listen) = opts.listen {
        transport.listen_addr = listen;
    }
    let config = NodeConfig {
        identity: Identity {
            id: opts.id,
            name: opts.name,
        },
        protocol,
        transport,
    };

    keyring.save(&data.keyring())?;
    config.save(&data.config())?;
    let store = SqliteStore::open(&data.database())?;
    store.add_or_update_profile(own_profile(&config.identity, &keyring))?;

    println!("initialised {}", data.root().display());
    println!("id         {}", config.identity.id);
    println!("key id     {}", keyring.own_key_id());
    println!("public key {}", keyring.export_public_key());
    Ok(())
}

pub fn show_key(env: &Env) {
    println!("id         {}", env.config.identity.id);
    println!("key id     {}", env.keyring.own_key_id());
    println!("public key {}", env.keyring.export_public_key());
}

// ── Running ───────────────────────────────────────────────────────────

pub async fn run(env: Env) -> anyhow::Result<()> {
    let listener = FrameListener::bind(&env.config.transport.to_config()).await?;
    tracing::info!(addr = %listener.local_addr(), "listening");
    eprintln!("murmeli v{} as {}", env!("CARGO_PKG_VERSION"), env.config.identity.id);
    eprintln!("listening on {}", listener.local_addr());

    let (listener_handle, frames) = listener.into_parts();
    let runtime = env.node.clone().start(frames);

    let keyring = env.keyring.clone();
    let keyring_path = env.data.keyring();
    let saver = tokio::spawn(async move {
        let mut interval = tokio::time::interval(KEYRING_SAVE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = keyring.save(&keyring_path) {
                tracing::warn!("keyring save failed: {e}");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    eprintln!("\nCtrl+C received, shutting down...");
    saver.abort();
    runtime.shutdown().await;
    listener_handle.shutdown().await;
    env.save_keyring()?;
    eprintln!("{}", env.node.engine().metrics());
    Ok(())
}

/// Try to deliver the outbox once.
pub async fn flush(env: &Env) -> anyhow::Result<()> {
    match env.node.engine().flush().await {
        FlushOutcome::Skipped => println!("outbox busy, flush skipped"),
        FlushOutcome::Completed { failed, remaining } => {
            for peer in failed {
                println!("unreachable: {peer}");
            }
            println!("{remaining} messages left in outbox");
        }
    }
    env.save_keyring()
}

// ── Contacts ──────────────────────────────────────────────────────────

pub fn request(env: &Env, peer: &PeerId, name: &str, message: &str, robot: bool) -> anyhow::Result<()> {
    env.node.trust().initiate(peer, name, message, robot)?;
    println!("contact request queued for {peer}");
    Ok(())
}

pub fn accept(env: &Env, peer: &PeerId, message: &str) -> anyhow::Result<()> {
    env.node.trust().accept(peer, message)?;
    env.save_keyring()?;
    println!("accepted {peer}");
    Ok(())
}

pub fn deny(env: &Env, peer: &PeerId) -> anyhow::Result<()> {
    env.node.trust().deny(peer)?;
    println!("denied {peer}");
    Ok(())
}

pub fn trust(env: &Env, peer: &PeerId, fingerprint: &str) -> anyhow::Result<()> {
    let contact = env.contact(peer)?;
    let key_id = contact.key_id.as_deref().unwrap_or_default();
    if !key_id.eq_ignore_ascii_case(fingerprint.trim()) {
        bail!("key id of {peer} is {key_id}, not {fingerprint}");
    }
    env.node.trust().set_trusted(peer)?;
    println!("{peer} is now trusted");
    Ok(())
}

pub fn block(env: &Env, peer: &PeerId) -> anyhow::Result<()> {
    env.node.trust().block(peer)?;
    println!("blocked {peer}");
    Ok(())
}

pub fn delete(env: &Env, peer: &PeerId) -> anyhow::Result<()> {
    env.node.trust().delete(peer)?;
    println!("deleted {peer}");
    Ok(())
}

pub fn refer(env: &Env, to: &PeerId, friend: &PeerId, message: &str) -> anyhow::Result<()> {
    env.node.trust().send_referral(to, friend, message)?;
    println!("introduced {friend} to {to}");
    Ok(())
}

pub fn ask_referral(env: &Env, to: &PeerId, friend: &PeerId, message: &str) -> anyhow::Result<()> {
    env.node.trust().send_refer_request(to, friend, message)?;
    println!("asked {to} to introduce {friend}");
    Ok(())
}

pub fn shared(env: &Env, peer: &PeerId) -> anyhow::Result<()> {
    let shared = env.node.trust().get_shared_possible_contacts(peer)?;
    let name = |id: &PeerId| shared.names.get(id).cloned().unwrap_or_default();
    for (label, ids) in [
        ("shared", &shared.shared),
        ("suggest to them", &shared.suggest_to_them),
        ("suggest to me", &shared.suggest_to_me),
    ] {
        println!("{label}:");
        for id in ids {
            println!("    {id} {}", name(id));
        }
    }
    Ok(())
}

pub fn remove_robot(env: &Env) -> anyhow::Result<()> {
    env.node.trust().remove_robot()?;
    println!("robot removed");
    Ok(())
}

pub fn contacts(env: &Env) -> anyhow::Result<()> {
    use ContactStatus::*;
    let profiles = env.store.get_profiles_with_status(&[
        Requested, Reqrobot, Untrusted, Trusted, Robot, Owner, Blocked,
    ])?;
    output::print_contacts(&profiles);
    output::print_pending(&env.store.pending_contacts()?);
    Ok(())
}

// ── Messages ──────────────────────────────────────────────────────────

pub fn send(env: &Env, to: &[PeerId], message: &str, reply_to: Option<&str>) -> anyhow::Result<()> {
    if to.is_empty() {
        bail!("no recipients");
    }
    let ids = env.node.send_message(to, message, reply_to)?;
    println!("queued {} message(s)", ids.len());
    Ok(())
}

pub fn inbox(env: &Env) -> anyhow::Result<()> {
    output::print_inbox(&env.store.get_inbox()?);
    Ok(())
}

pub fn delete_inbox(env: &Env, id: u64) -> anyhow::Result<()> {
    env.store.delete_from_inbox(id)?;
    Ok(())
}

pub fn outbox(env: &Env) -> anyhow::Result<()> {
    output::print_outbox(&env.store.get_outbox()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_at(dir: &std::path::Path, owner_key: Option<String>) -> DataDir {
        let data = DataDir::new(dir);
        init(
            &data,
            InitOptions {
                id: "alicealicealicea".parse().unwrap(),
                name: "Alice".into(),
                dispatcher: DispatcherKind::Regular,
                owner_key,
                listen: None,
                force: false,
            },
        )
        .unwrap();
        data
    }

    #[test]
    fn init_then_open() {
        let dir = tempfile::tempdir().unwrap();
        init_at(dir.path(), None);
        let env = Env::open(DataDir::new(dir.path())).unwrap();
        let own = env.store.own_profile().unwrap().unwrap();
        assert_eq!(own.tor_id, env.config.identity.id);
        assert_eq!(own.key_id, Some(env.keyring.own_key_id()));
        assert_eq!(env.config.protocol.dispatcher, DispatcherKind::Regular);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let data = init_at(dir.path(), None);
        let again = init(
            &data,
            InitOptions {
                id: "alicealicealicea".parse().unwrap(),
                name: "Alice".into(),
                dispatcher: DispatcherKind::Regular,
                owner_key: None,
                listen: None,
                force: false,
            },
        );
        assert!(again.is_err());
    }

    #[test]
    fn robot_init_records_owner() {
        let owner = LocalKeyring::from_seed([9; 32]);
        let dir = tempfile::tempdir().unwrap();
        init_at(dir.path(), Some(owner.export_public_key()));
        let env = Env::open(DataDir::new(dir.path())).unwrap();
        assert_eq!(env.config.protocol.dispatcher, DispatcherKind::Robot);
        assert_eq!(env.config.protocol.robot_owner_key_id, Some(owner.own_key_id()));
        assert!(env.keyring.public_key(&owner.own_key_id()).is_some());
    }

    #[test]
    fn request_is_queued_in_the_database() {
        let dir = tempfile::tempdir().unwrap();
        init_at(dir.path(), None);
        let env = Env::open(DataDir::new(dir.path())).unwrap();
        let bob: PeerId = "bobbobbobbobbobb".parse().unwrap();
        request(&env, &bob, "Bob", "hi", false).unwrap();
        drop(env);

        let env = Env::open(DataDir::new(dir.path())).unwrap();
        assert_eq!(env.store.get_outbox().unwrap().len(), 1);
        assert_eq!(
            env.store.get_profile(&bob).unwrap().map(|p| p.status),
            Some(ContactStatus::Requested)
        );
    }

    #[test]
    fn trust_checks_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        init_at(dir.path(), None);
        let env = Env::open(DataDir::new(dir.path())).unwrap();
        let bob_keys = LocalKeyring::from_seed([2; 32]);
        let bob: PeerId = "bobbobbobbobbobb".parse().unwrap();
        let mut p = ContactProfile::new(bob.clone(), ContactStatus::Untrusted, "Bob");
        p.key_id = env.keyring.import_public_key(&bob_keys.export_public_key());
        env.store.add_or_update_profile(p).unwrap();

        assert!(trust(&env, &bob, "0000").is_err());
        trust(&env, &bob, &bob_keys.own_key_id().to_lowercase()).unwrap();
        assert_eq!(env.contact(&bob).unwrap().status, ContactStatus::Trusted);
    }
}
