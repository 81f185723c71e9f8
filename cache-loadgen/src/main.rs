//! Load generator for a running lrucached server.
//!
//! Opens a number of concurrent connections and fires a configurable
//! set/get mix at the server, then reports throughput and hit counts.
//! Keys are drawn uniformly from a bounded key space so the cache sees
//! both hits and misses once it warms up.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;

/// TCP load generator for lrucached
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:11211")]
    addr: String,

    /// Number of concurrent connections
    #[arg(short, long, default_value = "8")]
    connections: usize,

    /// Requests per connection
    #[arg(short, long, default_value = "10000")]
    requests: usize,

    /// Value size in bytes
    #[arg(long, default_value = "100")]
    value_size: usize,

    /// Percentage of requests that are gets (the rest are sets)
    #[arg(long, default_value = "90")]
    get_ratio: u8,

    /// Number of distinct keys
    #[arg(long, default_value = "10000")]
    key_space: u32,
}

#[derive(Default)]
struct Tally {
    stored: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let tally = Arc::new(Tally::default());

    println!("Load generation");
    println!("===============");
    println!("Server: {}", args.addr);
    println!("Connections: {}", args.connections);
    println!("Requests per connection: {}", args.requests);
    println!(
        "Mix: {}% get / {}% set, {} byte values, {} keys",
        args.get_ratio,
        100 - args.get_ratio.min(100),
        args.value_size,
        args.key_space
    );
    println!();

    let started = Instant::now();
    let mut handles = Vec::with_capacity(args.connections);
    for worker in 0..args.connections {
        let addr = args.addr.clone();
        let tally = Arc::clone(&tally);
        let requests = args.requests;
        let value_size = args.value_size;
        let get_ratio = args.get_ratio;
        let key_space = args.key_space.max(1);
        handles.push(std::thread::spawn(move || {
            if let Err(err) = run_connection(
                &addr, worker, requests, value_size, get_ratio, key_space, &tally,
            ) {
                eprintln!("connection {worker} failed: {err}");
                tally.errors.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }
    let elapsed = started.elapsed();

    let stored = tally.stored.load(Ordering::Relaxed);
    let hits = tally.hits.load(Ordering::Relaxed);
    let misses = tally.misses.load(Ordering::Relaxed);
    let errors = tally.errors.load(Ordering::Relaxed);
    let total = stored + hits + misses;

    println!("Completed in {elapsed:.2?}");
    println!("Total requests: {total}");
    println!(
        "Throughput: {:.0} req/s",
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("Stored: {stored}");
    let lookups = hits + misses;
    if lookups > 0 {
        println!(
            "Hits: {hits} / Misses: {misses} ({:.1}% hit rate)",
            hits as f64 / lookups as f64 * 100.0
        );
    }
    if errors > 0 {
        println!("Failed connections: {errors}");
    }
    Ok(())
}

fn run_connection(
    addr: &str,
    _worker: usize,
    requests: usize,
    value_size: usize,
    get_ratio: u8,
    key_space: u32,
    tally: &Tally,
) -> std::io::Result<()> {
    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.set_nodelay(true)?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let mut rng = rand::thread_rng();
    let value = vec![b'x'; value_size];
    let mut line = Vec::with_capacity(256);

    for _ in 0..requests {
        let key_id = rng.gen_range(0..key_space);
        if rng.gen_range(0..100u8) < get_ratio {
            writer.write_all(format!("get k{key_id}\r\n").as_bytes())?;
            if read_get_reply(&mut reader, &mut line)? {
                tally.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                tally.misses.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            writer.write_all(format!("set k{key_id} 0 0 {}\r\n", value.len()).as_bytes())?;
            writer.write_all(&value)?;
            writer.write_all(b"\r\n")?;
            read_line(&mut reader, &mut line)?;
            if line.starts_with(b"STORED") {
                tally.stored.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    Ok(())
}

/// Reads one CRLF-terminated line into `line`.
fn read_line(reader: &mut BufReader<TcpStream>, line: &mut Vec<u8>) -> std::io::Result<()> {
    line.clear();
    reader.read_until(b'\n', line)?;
    if line.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "server closed the connection",
        ));
    }
    Ok(())
}

/// Consumes a full `get` reply; returns whether it was a hit.
fn read_get_reply(
    reader: &mut BufReader<TcpStream>,
    line: &mut Vec<u8>,
) -> std::io::Result<bool> {
    let mut hit = false;
    loop {
        read_line(reader, line)?;
        if line.starts_with(b"END") {
            return Ok(hit);
        }
        if line.starts_with(b"VALUE ") {
            hit = true;
            // Header: VALUE <key> <flags> <bytes>; consume the data block.
            let header = String::from_utf8_lossy(line);
            let bytes: usize = header
                .split_whitespace()
                .nth(3)
                .and_then(|field| field.trim().parse().ok())
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "bad VALUE header")
                })?;
            let mut data = vec![0u8; bytes + 2];
            reader.read_exact(&mut data)?;
        } else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected reply",
            ));
        }
    }
}
