mod commands;
mod config;
mod output;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use commands::{Env, InitOptions};
use config::DataDir;
use murmeli_protocol::DispatcherKind;
use murmeli_transport::PeerId;

#[derive(Parser)]
#[command(name = "murmeli", about = "Serverless, encrypted messaging over hidden services")]
struct Cli {
    /// Directory holding config, keyring and database.
    #[arg(short, long, default_value = "murmeli-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Regular,
    Robot,
    Parrot,
}

impl From<Mode> for DispatcherKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Regular => DispatcherKind::Regular,
            Mode::Robot => DispatcherKind::Robot,
            Mode::Parrot => DispatcherKind::Parrot,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a new identity in the data directory.
    Init {
        /// Our hidden-service id.
        #[arg(long)]
        id: PeerId,
        /// Name shown to contacts.
        #[arg(long)]
        name: String,
        #[arg(long, value_enum, default_value = "regular")]
        mode: Mode,
        /// Exported public key of the owner (makes this node a robot).
        #[arg(long)]
        owner_key: Option<String>,
        /// Local address the hidden service forwards to.
        #[arg(long)]
        listen: Option<SocketAddr>,
        #[arg(long)]
        force: bool,
    },

    /// Print our id, key id and public key.
    Key,

    /// Run the node until Ctrl+C.
    Run,

    /// Try to deliver the outbox once.
    Flush,

    /// Ask a peer to become a contact.
    Request {
        peer: PeerId,
        /// Local name for the peer.
        #[arg(long, default_value = "")]
        name: String,
        #[arg(short, long, default_value = "")]
        message: String,
        /// Ask the peer to become our robot.
        #[arg(long)]
        robot: bool,
    },

    /// Accept a contact request from the inbox.
    Accept {
        peer: PeerId,
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Refuse a contact request.
    Deny { peer: PeerId },

    /// Mark a contact trusted after comparing key ids out of band.
    Trust {
        peer: PeerId,
        /// The contact's key id as they read it to you.
        key_id: String,
    },

    Block { peer: PeerId },

    Delete { peer: PeerId },

    /// Introduce `friend` to `to`.
    Refer {
        to: PeerId,
        friend: PeerId,
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Ask `to` to introduce us to `friend`.
    AskReferral {
        to: PeerId,
        friend: PeerId,
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Compare our contacts with a peer's.
    Shared { peer: PeerId },

    /// Forget our robot.
    RemoveRobot,

    /// List contacts.
    Contacts,

    /// Queue a message.
    Send {
        /// Comma-separated recipients.
        #[arg(long, value_delimiter = ',', required = true)]
        to: Vec<PeerId>,
        message: String,
        /// Hash of the inbox message this replies to.
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// List received messages.
    Inbox {
        /// Delete this inbox row instead.
        #[arg(long)]
        delete: Option<u64>,
    },

    /// List queued messages.
    Outbox,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = DataDir::new(cli.data_dir);

    let command = match cli.command {
        Command::Init {
            id,
            name,
            mode,
            owner_key,
            listen,
            force,
        } => {
            let opts = InitOptions {
                id,
                name,
                dispatcher: mode.into(),
                owner_key,
                listen,
                force,
            };
            return commands::init(&data, opts);
        }
        command => command,
    };

    let env = Env::open(data)?;
    match command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Key => commands::show_key(&env),
        Command::Run => commands::run(env).await?,
        Command::Flush => commands::flush(&env).await?,
        Command::Request {
            peer,
            name,
            message,
            robot,
        } => commands::request(&env, &peer, &name, &message, robot)?,
        Command::Accept { peer, message } => commands::accept(&env, &peer, &message)?,
        Command::Deny { peer } => commands::deny(&env, &peer)?,
        Command::Trust { peer, key_id } => commands::trust(&env, &peer, &key_id)?,
        Command::Block { peer } => commands::block(&env, &peer)?,
        Command::Delete { peer } => commands::delete(&env, &peer)?,
        Command::Refer {
            to,
            friend,
            message,
        } => commands::refer(&env, &to, &friend, &message)?,
        Command::AskReferral {
            to,
            friend,
            message,
        } => commands::ask_referral(&env, &to, &friend, &message)?,
        Command::Shared { peer } => commands::shared(&env, &peer)?,
        Command::RemoveRobot => commands::remove_robot(&env)?,
        Command::Contacts => commands::contacts(&env)?,
        Command::Send {
            to,
            message,
            reply_to,
        } => commands::send(&env, &to, &message, reply_to.as_deref())?,
        Command::Inbox { delete: Some(id) } => commands::delete_inbox(&env, id)?,
        Command::Inbox { delete: None } => commands::inbox(&env)?,
        Command::Outbox => commands::outbox(&env)?,
    }
    Ok(())
}
