use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::error;

use wakestream::config::{available_models, Args, Config};
use wakestream::{logging, Pipeline};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let info_only = matches!(
                e.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            );
            let _ = e.print();
            return if info_only { 0 } else { 1 };
        }
    };

    if args.list_models {
        return match available_models(Path::new("models")) {
            Ok(names) => {
                for name in names {
                    println!("{name}");
                }
                0
            }
            Err(e) => {
                eprintln!("[ERROR] {e:#}");
                1
            }
        };
    }

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {e:#}");
            eprintln!();
            let _ = Args::command().print_help();
            return 1;
        }
    };

    logging::init(config.output_mode);

    let mut pipeline = match Pipeline::new(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("failed to initialize pipeline: {e:#}");
            return 1;
        }
    };

    let running = pipeline.running_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        error!("failed to install signal handler: {e}");
        return 1;
    }

    pipeline.start();
    pipeline.wait_until_ready();

    let frame_samples = config.frame_samples();
    let mut bytes = vec![0u8; frame_samples * 2];
    let mut samples = vec![0i16; frame_samples];
    let stdin = std::io::stdin();
    let mut stdin = stdin.lock();

    while pipeline.is_running() {
        let filled = match read_chunk(&mut stdin, &mut bytes) {
            Ok(filled) => filled,
            Err(e) => {
                error!("audio read failed: {e}");
                break;
            }
        };
        let count = filled / 2;
        if count == 0 {
            break;
        }

        for (sample, pair) in samples.iter_mut().zip(bytes[..count * 2].chunks_exact(2)) {
            *sample = i16::from_le_bytes([pair[0], pair[1]]);
        }
        if let Err(e) = pipeline.process_audio(&mut samples[..count]) {
            error!("{e:#}");
            pipeline.stop();
            return 1;
        }

        if filled < bytes.len() {
            break; // EOF
        }
    }

    pipeline.stop();
    0
}

/// Fill `buf` from the reader, tolerating short reads; returns the byte
/// count actually read, which is less than `buf.len()` only at EOF.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
