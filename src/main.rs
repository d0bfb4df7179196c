mod errors;
mod protocol;
mod runner;
mod store;
mod trace;
mod transport;

use std::env;
use std::process;

use runner::{run_cluster, ClusterConfig};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut config = ClusterConfig::default();
    match args.len() {
        1 => {}
        2 if args[1] == "help" || args[1] == "--help" => {
            print_usage();
            return;
        }
        2 | 3 => {
            config.num_peers = match args[1].parse() {
                Ok(n) if (2..=protocol::MAX_PEERS).contains(&n) => n,
                _ => {
                    eprintln!("num_peers must be an integer in 2..={}", protocol::MAX_PEERS);
                    print_usage();
                    process::exit(2);
                }
            };
            if args.len() == 3 {
                config.entry_limit = match args[2].parse() {
                    Ok(limit) => limit,
                    Err(_) => {
                        eprintln!("entry_limit must be a non-negative integer");
                        print_usage();
                        process::exit(2);
                    }
                };
            }
        }
        _ => {
            print_usage();
            process::exit(2);
        }
    }

    println!(
        "Running {} peers, {} critical-section entries each...",
        config.num_peers, config.entry_limit
    );

    let outcome = match run_cluster(&config) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            process::exit(1);
        }
    };

    println!("Final store:");
    for row in &outcome.slots {
        println!(
            "  peer {}: clock={} entries={}",
            row.peer_id, row.clock, row.entries
        );
    }

    if outcome.check.passed() {
        println!("Run verified: mutual exclusion and liveness hold.");
    } else {
        eprintln!("Run FAILED verification:");
        for violation in &outcome.check.violations {
            eprintln!("  {:?}", violation);
        }
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!("Usage: lamport-mutex [num_peers] [entry_limit]");
    eprintln!(
        "  num_peers    cluster size, 2..={} (default 3)",
        protocol::MAX_PEERS
    );
    eprintln!("  entry_limit  critical-section entries per peer (default 5)");
}
