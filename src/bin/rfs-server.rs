//! this binary starts the rfs server
//! to see the list of options, type: `rfs-server --help`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::{crate_version, value_t, App, Arg};
use rfs::config::parse_addr;
use rfs::{IdlePolicy, Result, RfsError, RfsServer, ServerConfig, DEFAULT_ADDRESS};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ROOT: &str = ".";
const DEFAULT_IDLE_SECS: u64 = 10;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    root: PathBuf,
    idle: IdlePolicy,
}

impl Opt {
    /// validates the `addr` and `root` parameters
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`RfsError::Parsing`] if one of the parameters is invalid
    ///
    fn build(addr: &str, root: &str, idle_secs: u64) -> Result<Opt> {
        let addr = parse_addr(addr)?;
        let root = PathBuf::from(root);
        if !root.is_dir() {
            return Err(RfsError::Parsing(format!("the root {:?} is not a directory", root)));
        }
        // 0 means a worker exits as soon as its queue is empty
        let idle = match idle_secs {
            0 => IdlePolicy::Exit,
            secs => IdlePolicy::Linger(Duration::from_secs(secs)),
        };
        Ok(Opt { addr, root, idle })
    }
}

fn main() {
    // parse command line args
    let matches = App::new("rfs-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a remote file service that serializes work per file")
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT that the server listens on")
            .default_value(DEFAULT_ADDRESS))
        .arg(Arg::with_name("root")
            .long("root")
            .value_name("DIR")
            .help("sets the directory that remote keys are resolved against")
            .default_value(DEFAULT_ROOT))
        .arg(Arg::with_name("idle-timeout")
            .long("idle-timeout")
            .value_name("SECS")
            .help("seconds an idle file worker lingers before exiting, 0 exits immediately"))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .help("log every request at DEBUG level"))
        .get_matches();

    // set up a tracing subscriber to log to STDERR
    subscriber_config(matches.is_present("verbose"));

    // validate command line options, store them in Opt
    let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS);
    let root = matches.value_of("root").unwrap_or(DEFAULT_ROOT);
    let idle_secs = if matches.is_present("idle-timeout") {
        value_t!(matches, "idle-timeout", u64).unwrap_or_else(|e| e.exit())
    } else {
        DEFAULT_IDLE_SECS
    };
    let opt = match Opt::build(addr, root, idle_secs) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("rfs-server {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::new(opt.addr, opt.root).idle(opt.idle);
    let server = RfsServer::bind(config)?;
    info!("Listening on {}", server.local_addr()?);

    let handle = server.shutdown_handle()?;
    ctrlc::set_handler(move || {
        info!("interrupted, shutting down");
        handle.shutdown();
    })
    .expect("Error setting Ctrl-C handler");

    server.run()
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(verbose: bool) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events at INFO or above (DEBUG with --verbose) will be written
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
