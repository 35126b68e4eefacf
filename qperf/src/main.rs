mod config;
mod debuginfo;
mod driver;
mod input;
mod output;
mod reorder;
mod stats;

use clap::Parser;

use config::{Config, Opt};
use driver::DriverError;
use input::InputError;

fn main() {
    env_logger::init();

    let opt = Opt::parse();
    let config = match Config::try_from(opt) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid options: {err}");
            std::process::exit(7);
        }
    };

    if let Err(err) = driver::run(config) {
        eprintln!("qperf failed: {err}");
        std::process::exit(exit_code_for(&err));
    }
}

/// Maps a top-level driver failure to the process exit code a consumer
/// can branch on without parsing the message text.
fn exit_code_for(err: &DriverError) -> i32 {
    match err {
        DriverError::Input(InputError::Socket { .. }) => 1,
        DriverError::Input(InputError::Open(_)) => 2,
        DriverError::Input(InputError::BadMagic) => 3,
        DriverError::Input(InputError::Decode(decode_err)) => exit_code_for_decode(decode_err),
        DriverError::Proto(_) | DriverError::Io(_) => 5,
    }
}

fn exit_code_for_decode(err: &qperf_data::Error) -> i32 {
    match err {
        qperf_data::Error::BadMagic => 3,
        qperf_data::Error::HeaderError | qperf_data::Error::BadFeatureSection(_) => 4,
        qperf_data::Error::BadAttr | qperf_data::Error::SignalError => 6,
        qperf_data::Error::RecordTooSmall { .. } | qperf_data::Error::Io(_) => 5,
        _ => 5,
    }
}
