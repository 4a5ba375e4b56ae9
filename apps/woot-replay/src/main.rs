//! # WOOT Replay
//!
//! A standalone CLI that replays collaboration scenarios on top of the WOOT
//! SDK. Every site integrates its own edits immediately and ships wire
//! records to its peers, which may receive them late, twice, or out of order.
//!
//! ## Delivery model
//!
//! ```text
//! site ──local edit──▶ integrate ──encode──▶ log
//! log  ──send (any order, any repeats)──▶ peer causal queue ──▶ peer document
//! ```

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use woot_sdk::{
    decode_message, Message, MemoryHub, Operation, Site, SiteConfig, SiteId, Transport,
};

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "woot-replay")]
#[command(about = "Replay WOOT collaborative editing scenarios (WOOT SDK)")]
#[command(version)]
struct Cli {
    /// Site configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reverse delivery, concurrent inserts, early deletes and redelivery
    Scenarios,
    /// Three concurrent inserts at the same place, observed in every order
    Conflict,
    /// Random edits on many sites, shuffled delivery over an in-memory hub
    Shuffle {
        #[arg(long, default_value_t = 4)]
        sites: usize,
        #[arg(long, default_value_t = 50)]
        edits: usize,
        #[arg(long, default_value_t = 3)]
        rounds: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Interactive REPL for manual experimentation
    Interactive,
}

// ─── Peer: a simulated site and everything it has broadcast ───────────────

struct Peer {
    site: Site,
    log: Vec<Vec<u8>>,
}

impl Peer {
    fn new(id: &str, config: &SiteConfig) -> Self {
        Self {
            site: Site::new(id, config.clone()),
            log: Vec::new(),
        }
    }

    fn name(&self) -> String {
        self.site.id().to_string()
    }

    /// Type `text` at `index`, one character at a time.
    fn type_text(&mut self, index: usize, text: &str) -> woot_sdk::Result<Vec<Operation>> {
        let mut ops = Vec::new();
        for (offset, value) in text.chars().enumerate() {
            let op = self.site.local_insert(index + offset, value)?;
            self.log.push(self.site.encode(&op)?);
            ops.push(op);
        }
        Ok(ops)
    }

    /// Delete `count` characters starting at `index`.
    fn delete(&mut self, index: usize, count: usize) -> woot_sdk::Result<Vec<Operation>> {
        let mut ops = Vec::new();
        for _ in 0..count {
            let op = self.site.local_delete(index)?;
            self.log.push(self.site.encode(&op)?);
            ops.push(op);
        }
        Ok(ops)
    }

    /// Deliver wire records, returning (integrated, queued, duplicates).
    fn deliver(&mut self, records: &[Vec<u8>]) -> woot_sdk::Result<(usize, usize, usize)> {
        let mut totals = (0, 0, 0);
        for bytes in records {
            let update = self.site.receive_bytes(bytes)?;
            totals.0 += update.deltas.len();
            totals.1 += usize::from(update.queued);
            totals.2 += update.duplicates;
        }
        Ok(totals)
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn send_arrow(from: &str, to: &str, records: usize, order: &str) {
    println!(
        "  {} {} {} {}",
        from.bright_magenta(),
        format!("──{} record(s), {}──▶", records, order).bright_cyan(),
        to.bright_magenta(),
        "✓".bright_green()
    );
}

fn show_site(site: &Site) {
    let border = "─".repeat(44);
    let status = site.status();
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Site: {}", status.site).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);
    println!("  │ {:<42} │", format!("text     = {:?}", site.text()));
    println!("  │ {:<42} │", format!("clock    = {}", status.clock));
    println!(
        "  │ {:<42} │",
        format!(
            "chars    = {} ({} visible)",
            site.document().len(),
            site.document().visible_len()
        )
    );
    println!("  │ {:<42} │", format!("pending  = {}", status.pending));
    println!("  └{}┘", border);
}

fn convergence_check(sites: &[&Site]) -> bool {
    sites
        .windows(2)
        .all(|pair| pair[0].document() == pair[1].document())
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL SITES CONVERGED: documents are identical!"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: sites differ!".bright_red().bold()
        );
    }
}

fn verdict(label: &str, ok: bool) -> bool {
    if ok {
        step(&format!("{} {}", label, "passed".bright_green()));
    } else {
        step(&format!("{} {}", label, "FAILED".bright_red().bold()));
    }
    ok
}

fn reversed(records: &[Vec<u8>]) -> Vec<Vec<u8>> {
    records.iter().rev().cloned().collect()
}

// ─── Scenarios ─────────────────────────────────────────────────────────────

fn run_scenarios(config: &SiteConfig) -> woot_sdk::Result<bool> {
    header("SCENARIOS: Reordering, Concurrency, Early Deletes, Redelivery");
    let mut all_ok = true;

    section("A: records arrive in reverse order");
    let mut s1 = Peer::new("1", config);
    let mut s2 = Peer::new("2", config);
    s1.type_text(0, "ab")?;
    step("site 1 types \"ab\"");
    let (integrated, queued, _) = s2.deliver(&reversed(&s1.log))?;
    send_arrow("1", "2", s1.log.len(), "reversed");
    step(&format!("site 2 parked {} and integrated {}", queued, integrated));
    show_site(&s2.site);
    all_ok &= verdict("A", s2.site.text() == "ab" && queued == 1);

    section("B: concurrent inserts into an empty document");
    let mut s1 = Peer::new("1", config);
    let mut s2 = Peer::new("2", config);
    s1.type_text(0, "x")?;
    s2.type_text(0, "y")?;
    step("site 1 types \"x\", site 2 types \"y\", neither has seen the other");
    let from_1 = s1.log.clone();
    let from_2 = s2.log.clone();
    s2.deliver(&from_1)?;
    s1.deliver(&from_2)?;
    send_arrow("1", "2", from_1.len(), "in order");
    send_arrow("2", "1", from_2.len(), "in order");
    show_site(&s1.site);
    show_site(&s2.site);
    all_ok &= verdict("B", convergence_check(&[&s1.site, &s2.site]));

    section("C: a delete overtakes its insert");
    let mut s1 = Peer::new("1", config);
    let mut s2 = Peer::new("2", config);
    s1.type_text(0, "q")?;
    s1.delete(0, 1)?;
    step("site 1 types \"q\" and deletes it");
    let (_, queued, _) = s2.deliver(&s1.log[1..])?;
    send_arrow("1", "2", 1, "delete only");
    step(&format!("site 2 pending after the delete: {}", s2.site.pending_count()));
    let early_ok = queued == 1 && s2.site.pending_count() == 1;
    s2.deliver(&s1.log[..1])?;
    send_arrow("1", "2", 1, "insert");
    show_site(&s2.site);
    all_ok &= verdict(
        "C",
        early_ok && s2.site.text().is_empty() && s2.site.pending_count() == 0,
    );

    section("D: an insert is delivered twice");
    let before = s2.site.text();
    let (_, _, duplicates) = s2.deliver(&s1.log[..1])?;
    step(&format!("site 2 reports {} duplicate(s)", duplicates));
    all_ok &= verdict("D", duplicates == 1 && s2.site.text() == before);

    convergence_result(all_ok);
    Ok(all_ok)
}

// ─── Conflict ──────────────────────────────────────────────────────────────

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for slot in 0..=rest.len() {
            let mut perm = rest.clone();
            perm.insert(slot, n - 1);
            out.push(perm);
        }
    }
    out
}

fn run_conflict(config: &SiteConfig) -> woot_sdk::Result<bool> {
    header("CONFLICT: Three Concurrent Inserts, Order Independence");

    section("Phase 1: three sites type at the start of an empty document");
    let mut writers = vec![
        Peer::new("node-1", config),
        Peer::new("node-2", config),
        Peer::new("node-3", config),
    ];
    for (writer, text) in writers.iter_mut().zip(["a", "b", "c"]) {
        writer.type_text(0, text)?;
        step(&format!("{} types {:?}", writer.name(), text));
    }

    section("Phase 2: fresh observers receive the records in every order");
    let mut observers = Vec::new();
    for (n, order) in permutations(writers.len()).into_iter().enumerate() {
        let mut observer = Peer::new(&format!("observer-{}", n + 1), config);
        for &i in &order {
            observer.deliver(&writers[i].log)?;
        }
        let names: Vec<String> = order.iter().map(|&i| writers[i].name()).collect();
        step(&format!(
            "{:<12} {:<28} → {:?}",
            observer.name(),
            names.join(", "),
            observer.site.text()
        ));
        observers.push(observer);
    }

    let sites: Vec<&Site> = observers.iter().map(|o| &o.site).collect();
    let ok = convergence_check(&sites);
    convergence_result(ok);
    Ok(ok)
}

// ─── Shuffle ───────────────────────────────────────────────────────────────

async fn run_shuffle(
    config: &SiteConfig,
    sites: usize,
    edits: usize,
    rounds: usize,
    seed: u64,
) -> woot_sdk::Result<bool> {
    header("SHUFFLE: Random Edits, Scrambled Delivery Over a Hub");
    let mut rng = StdRng::seed_from_u64(seed);

    let hub = MemoryHub::new();
    let mut peers: Vec<Peer> = (0..sites)
        .map(|i| Peer::new(&format!("site-{}", i + 1), config))
        .collect();
    let mut transports: Vec<_> = peers.iter().map(|p| hub.join(p.site.id().clone())).collect();
    step(&format!("{} sites joined the hub (seed {})", hub.peer_count(), seed));

    let per_round = edits / rounds.max(1);
    let mut warnings = 0;
    for round in 1..=rounds {
        section(&format!("Round {}/{}: editing", round, rounds));
        for (peer, transport) in peers.iter_mut().zip(&transports) {
            let sent_before = peer.log.len();
            for _ in 0..per_round {
                let len = peer.site.document().visible_len();
                if len > 0 && rng.gen_bool(0.3) {
                    peer.delete(rng.gen_range(0..len), 1)?;
                } else {
                    let value = char::from(b'a' + rng.gen_range(0..26u8));
                    peer.type_text(rng.gen_range(0..=len), &value.to_string())?;
                }
            }
            for bytes in &peer.log[sent_before..] {
                transport.broadcast(bytes.clone()).await?;
            }
        }

        section(&format!("Round {}/{}: delivering", round, rounds));
        for (peer, transport) in peers.iter_mut().zip(transports.iter_mut()) {
            let mut inbox = Vec::new();
            while let Some(bytes) = transport.try_recv() {
                inbox.push(bytes);
            }
            // at-least-once: duplicate a few records
            let extra: Vec<_> = inbox.iter().filter(|_| rng.gen_bool(0.1)).cloned().collect();
            inbox.extend(extra);
            inbox.shuffle(&mut rng);

            let mut parked = 0;
            for bytes in &inbox {
                let update = peer.site.receive_bytes(bytes)?;
                parked += usize::from(update.queued);
                warnings += update.warnings.len();
            }
            step(&format!(
                "{:<8} received {:>4} record(s), parked {:>3}, pending {:>3}",
                peer.name(),
                inbox.len(),
                parked,
                peer.site.pending_count()
            ));
        }
    }

    section("Final state");
    for peer in &peers {
        show_site(&peer.site);
    }
    if warnings > 0 {
        step(&format!("{} delivery warning(s) raised", warnings));
    }

    let all: Vec<&Site> = peers.iter().map(|p| &p.site).collect();
    let ok = convergence_check(&all) && peers.iter().all(|p| p.site.pending_count() == 0);
    convergence_result(ok);
    Ok(ok)
}

// ─── Interactive REPL ──────────────────────────────────────────────────────

fn run_interactive(config: &SiteConfig) {
    header("INTERACTIVE: WOOT Replay REPL");
    println!("  Type {} for commands.\n", "help".bright_cyan());

    let mut peers: HashMap<String, Peer> = HashMap::new();
    // (receiver, sender) → how much of the sender's log was shipped
    let mut cursors: HashMap<(String, String), usize> = HashMap::new();
    let mut rng = StdRng::from_entropy();

    loop {
        print!("{} ", "woot>".bright_cyan().bold());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "site" if parts.len() == 2 => {
                if peers.contains_key(parts[1]) {
                    println!("  {} Site '{}' already exists", "!".bright_yellow(), parts[1]);
                } else {
                    peers.insert(parts[1].to_string(), Peer::new(parts[1], config));
                    step(&format!("created site {}", parts[1].bright_yellow()));
                }
            }

            "ins" if parts.len() >= 4 => match (peers.get_mut(parts[1]), parts[2].parse::<usize>()) {
                (Some(peer), Ok(index)) => {
                    let text = parts[3..].join(" ");
                    match peer.type_text(index, &text) {
                        Ok(ops) => step(&format!("{} inserted {} char(s)", parts[1], ops.len())),
                        Err(err) => println!("  {} {}", "✗".bright_red(), err),
                    }
                }
                (None, _) => println!("  {} Unknown site '{}'", "!".bright_red(), parts[1]),
                (_, Err(_)) => println!("  {} Bad index '{}'", "!".bright_red(), parts[2]),
            },

            "del" if parts.len() >= 3 => {
                let count = parts.get(3).and_then(|n| n.parse().ok()).unwrap_or(1);
                match (peers.get_mut(parts[1]), parts[2].parse::<usize>()) {
                    (Some(peer), Ok(index)) => match peer.delete(index, count) {
                        Ok(ops) => step(&format!("{} deleted {} char(s)", parts[1], ops.len())),
                        Err(err) => println!("  {} {}", "✗".bright_red(), err),
                    },
                    (None, _) => println!("  {} Unknown site '{}'", "!".bright_red(), parts[1]),
                    (_, Err(_)) => println!("  {} Bad index '{}'", "!".bright_red(), parts[2]),
                }
            }

            "send" if parts.len() >= 3 => {
                let order = parts.get(3).copied().unwrap_or("inorder");
                let key = (parts[2].to_string(), parts[1].to_string());
                let start = cursors.get(&key).copied().unwrap_or(0);
                let batch = match peers.get(parts[1]) {
                    Some(sender) if peers.contains_key(parts[2]) => {
                        let mut batch = sender.log[start..].to_vec();
                        match order {
                            "reverse" => batch.reverse(),
                            "shuffle" => batch.shuffle(&mut rng),
                            _ => {}
                        }
                        Some((batch, sender.log.len()))
                    }
                    _ => None,
                };
                match batch {
                    Some((batch, end)) => {
                        cursors.insert(key, end);
                        if let Some(receiver) = peers.get_mut(parts[2]) {
                            match receiver.deliver(&batch) {
                                Ok((integrated, queued, dups)) => {
                                    send_arrow(parts[1], parts[2], batch.len(), order);
                                    step(&format!(
                                        "integrated {}, parked {}, duplicates {}",
                                        integrated, queued, dups
                                    ));
                                }
                                Err(err) => println!("  {} {}", "✗".bright_red(), err),
                            }
                        }
                    }
                    None => println!("  {} Unknown site in '{} → {}'", "!".bright_red(), parts[1], parts[2]),
                }
            }

            "resend" if parts.len() == 4 => {
                let index = parts[3].parse::<usize>().ok();
                let record = peers
                    .get(parts[1])
                    .and_then(|sender| index.and_then(|i| sender.log.get(i).cloned()));
                match (record, peers.get_mut(parts[2])) {
                    (Some(bytes), Some(receiver)) => match receiver.deliver(&[bytes]) {
                        Ok((integrated, queued, dups)) => step(&format!(
                            "integrated {}, parked {}, duplicates {}",
                            integrated, queued, dups
                        )),
                        Err(err) => println!("  {} {}", "✗".bright_red(), err),
                    },
                    _ => println!("  {} No such record or site", "!".bright_red()),
                }
            }

            "join" if parts.len() == 3 => {
                if peers.contains_key(parts[1]) {
                    println!("  {} Site '{}' already exists", "!".bright_yellow(), parts[1]);
                    continue;
                }
                let Some(donor) = peers.get(parts[2]) else {
                    println!("  {} Unknown site '{}'", "!".bright_red(), parts[2]);
                    continue;
                };
                let mut snapshot = donor.site.snapshot();
                snapshot.site = SiteId::from(parts[1]);
                snapshot.clock_value = 1;
                let restored = snapshot
                    .to_json()
                    .and_then(|bytes| decode_message(&bytes))
                    .and_then(|message| match message {
                        Message::Snapshot(snapshot) => Site::from_snapshot(snapshot, config.clone()),
                        Message::Operation(_) => Err(woot_sdk::SdkError::MalformedMessage(
                            "expected a snapshot".into(),
                        )),
                    });
                match restored {
                    Ok(site) => {
                        // everything the donor had is already in the snapshot
                        let donor_log = donor.log.len();
                        cursors.insert((parts[1].to_string(), parts[2].to_string()), donor_log);
                        peers.insert(parts[1].to_string(), Peer { site, log: Vec::new() });
                        step(&format!("{} joined from a snapshot of {}", parts[1], parts[2]));
                    }
                    Err(err) => println!("  {} {}", "✗".bright_red(), err),
                }
            }

            "snapshot" if parts.len() == 2 => match peers.get(parts[1]) {
                Some(peer) => match serde_json::to_string_pretty(&peer.site.snapshot()) {
                    Ok(json) => println!("{}", json.dimmed()),
                    Err(err) => println!("  {} {}", "✗".bright_red(), err),
                },
                None => println!("  {} Unknown site '{}'", "!".bright_red(), parts[1]),
            },

            "show" if parts.len() == 2 => match peers.get(parts[1]) {
                Some(peer) => show_site(&peer.site),
                None => println!("  {} Unknown site '{}'", "!".bright_red(), parts[1]),
            },

            "list" => {
                let mut names: Vec<&String> = peers.keys().collect();
                names.sort();
                for name in names {
                    let peer = &peers[name];
                    println!(
                        "  {} {:?} (sent {}, pending {})",
                        name.bright_yellow(),
                        peer.site.text(),
                        peer.log.len(),
                        peer.site.pending_count()
                    );
                }
            }

            "check" => {
                let sites: Vec<&Site> = peers.values().map(|p| &p.site).collect();
                convergence_result(convergence_check(&sites));
            }

            "quit" | "exit" | "q" => {
                println!("  {}", "Goodbye!".dimmed());
                break;
            }

            "help" | "h" | "?" => {
                println!("  site <name> | ins <s> <index> <text> | del <s> <index> [n]");
                println!("  send <from> <to> [inorder|reverse|shuffle] | resend <from> <to> <n>");
                println!("  join <new> <donor> | snapshot <s> | show <s> | list | check | quit");
            }

            other => {
                println!(
                    "  {} Unknown command '{}', type 'help'",
                    "?".bright_yellow(),
                    other
                );
            }
        }
    }
}

// ─── Entry point ───────────────────────────────────────────────────────────

fn load_config(path: Option<&PathBuf>) -> woot_sdk::Result<SiteConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|err| {
                woot_sdk::SdkError::InvalidConfig(format!("{}: {}", path.display(), err))
            })?;
            SiteConfig::from_json(&json)
        }
        None => Ok(SiteConfig::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {}", "error:".bright_red().bold(), err);
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Commands::Scenarios => run_scenarios(&config),
        Commands::Conflict => run_conflict(&config),
        Commands::Shuffle {
            sites,
            edits,
            rounds,
            seed,
        } => run_shuffle(&config, sites, edits, rounds, seed).await,
        Commands::Interactive => {
            run_interactive(&config);
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {}", "error:".bright_red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
