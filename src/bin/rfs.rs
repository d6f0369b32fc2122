//! The rfs executable supports the following command line arguments:
//!
//! `rfs WRITE <LOCAL_PATH> <REMOTE_KEY> [--addr IP-PORT]`
//!
//!     Upload a local file to the server, overwriting the remote file.
//!
//! `rfs GET <REMOTE_KEY> <LOCAL_PATH> [--addr IP-PORT]`
//!
//!     Download a remote file into a local file, overwriting the local file.
//!
//! `rfs RM <REMOTE_KEY> [--addr IP-PORT]`
//!
//!     Delete a remote file.
//!
//! --addr accepts an IP address, either v4 or v6, and a port number, with the format IP:PORT.
//! If --addr is not specified then connect on 127.0.0.1:2000.
//! The server's status is printed to stdout. Any failure is printed to stderr and exits with
//! a non-zero exit code.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::exit;

use clap::{crate_version, App, AppSettings, Arg, ArgMatches, SubCommand};
use rfs::config::parse_addr;
use rfs::{Progress, Result, RfsClient, RfsError, DEFAULT_ADDRESS};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// the operation requested on the command line
#[derive(Debug)]
enum Operation {
    Write { local: PathBuf, remote: String },
    Get { remote: String, local: PathBuf },
    Rm { remote: String },
}

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the server's ip:port
    addr: SocketAddr,
    op: Operation,
}

fn main() {
    let matches = App::new("rfs")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a remote file service client")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommands(vec![
            SubCommand::with_name("WRITE")
                .about("Upload a local file to the server")
                .arg(Arg::with_name("LOCAL_PATH").required(true).index(1))
                .arg(Arg::with_name("REMOTE_KEY").required(true).index(2))
                .args(&common_args()),
            SubCommand::with_name("GET")
                .about("Download a remote file")
                .arg(Arg::with_name("REMOTE_KEY").required(true).index(1))
                .arg(Arg::with_name("LOCAL_PATH").required(true).index(2))
                .args(&common_args()),
            SubCommand::with_name("RM")
                .about("Delete a remote file")
                .arg(Arg::with_name("REMOTE_KEY").required(true).index(1))
                .args(&common_args()),
        ])
        .get_matches();

    let result = match matches.subcommand() {
        (name, Some(args)) => {
            subscriber_config(args.is_present("verbose"));
            parse_options(name, args).and_then(run)
        }
        _ => Err(RfsError::Parsing("no command given".to_string())),
    };

    if let Err(e) = result {
        eprintln!("rfs: {}", e);
        exit(1);
    }
}

/// runs the requested operation against the server at `opt.addr`
fn run(opt: Opt) -> Result<()> {
    let client = RfsClient::connect(opt.addr)?.progress(Progress::Console);
    match opt.op {
        Operation::Write { local, remote } => {
            let msg = client.write(&local, &remote)?;
            println!("{}", msg);
        }
        Operation::Get { remote, local } => {
            let len = client.get(&remote, &local)?;
            println!("{} bytes received into {}", len, local.display());
        }
        Operation::Rm { remote } => {
            let msg = client.remove(&remote)?;
            println!("{}", msg);
        }
    }
    Ok(())
}

/// parses the matches of subcommand `name` into an [`Opt`] struct
fn parse_options(name: &str, args: &ArgMatches) -> Result<Opt> {
    let addr = parse_addr(args.value_of("addr").unwrap_or(DEFAULT_ADDRESS))?;
    let value = |arg: &str| -> Result<String> {
        args.value_of(arg)
            .map(String::from)
            .ok_or_else(|| RfsError::Parsing(format!("missing {}", arg)))
    };

    let op = match name {
        "WRITE" => Operation::Write {
            local: PathBuf::from(value("LOCAL_PATH")?),
            remote: value("REMOTE_KEY")?,
        },
        "GET" => Operation::Get {
            remote: value("REMOTE_KEY")?,
            local: PathBuf::from(value("LOCAL_PATH")?),
        },
        "RM" => Operation::Rm {
            remote: value("REMOTE_KEY")?,
        },
        other => return Err(RfsError::Parsing(format!("unknown command {}", other))),
    };
    Ok(Opt { addr, op })
}

/// the `--addr` and `--verbose` options shared by every subcommand
fn common_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT of the server to connect to")
            .default_value(DEFAULT_ADDRESS),
        Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .help("log protocol details to STDERR"),
    ]
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(verbose: bool) {
    let subscriber = FmtSubscriber::builder()
        // warnings and errors only, unless asked for more
        .with_max_level(if verbose { Level::DEBUG } else { Level::WARN })
        // log to stderr so stdout only carries the server's status
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
