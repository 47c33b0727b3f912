use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tag_reputation::registry::{create_tag, register_user};
use tag_reputation::{
    EngineConfig, ManualClock, MemoryStore, ReputationEngine, TagKey, TagSettings, Timestamp, UserKey, VoteValue,
};

/// Everything lives in memory; the clock only moves on `advance`.
struct Demo {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    engine: ReputationEngine,
    users: BTreeMap<String, UserKey>,
    tags: BTreeMap<String, TagKey>,
}

impl Demo {
    fn new(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000_000_000)));
        let engine = ReputationEngine::new(store.clone(), clock.clone(), config);
        Demo {
            store,
            clock,
            engine,
            users: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    fn user(&self, handle: &str) -> Option<UserKey> {
        let found = self.users.get(&handle.to_lowercase()).copied();
        if found.is_none() {
            eprintln!("no such user {}", handle);
        }
        found
    }

    fn tag(&self, handle: &str) -> Option<TagKey> {
        let found = self.tags.get(&handle.to_lowercase()).copied();
        if found.is_none() {
            eprintln!("no such tag {}", handle);
        }
        found
    }

    fn cmd_user(&mut self, handle: &str, display_name: &str) {
        match register_user(self.store.as_ref(), handle, display_name, None) {
            Ok(user) => {
                println!("user {} = {}", user.handle, user.key);
                self.users.insert(user.handle, user.key);
            }
            Err(e) => eprintln!("user {} failed: {}", handle, e),
        }
    }

    fn cmd_tag(&mut self, creator: &str, handle: &str, min_users: Option<u32>) {
        let creator = match self.user(creator) {
            Some(u) => u,
            None => return,
        };
        let mut settings = TagSettings::default();
        if let Some(n) = min_users {
            settings.min_users_for_threshold = n;
        }
        match create_tag(self.store.as_ref(), creator, handle, "", settings) {
            Ok(tag) => {
                println!("tag {} = {}", tag.handle, tag.key);
                self.tags.insert(tag.handle, tag.key);
            }
            Err(e) => eprintln!("tag {} failed: {}", handle, e),
        }
    }

    fn cmd_vote(&mut self, voter: &str, target: &str, tag: &str, value: VoteValue) {
        let (voter, target, tag) = match (self.user(voter), self.user(target), self.tag(tag)) {
            (Some(v), Some(t), Some(g)) => (v, t, g),
            _ => return,
        };
        match self.engine.cast_vote(voter, target, tag, value) {
            Ok(vote) => println!("vote {:?} weight={:.4}", vote.value, vote.weight),
            Err(e) => eprintln!("vote failed: {}", e),
        }
    }

    fn cmd_unvote(&mut self, voter: &str, target: &str, tag: &str) {
        let (voter, target, tag) = match (self.user(voter), self.user(target), self.tag(tag)) {
            (Some(v), Some(t), Some(g)) => (v, t, g),
            _ => return,
        };
        match self.engine.retract_vote(voter, target, tag) {
            Ok(true) => println!("vote retracted"),
            Ok(false) => println!("no vote to retract"),
            Err(e) => eprintln!("unvote failed: {}", e),
        }
    }

    fn cmd_rep(&self, who: &str, tag: &str) {
        let (user, tag) = match (self.user(who), self.tag(tag)) {
            (Some(u), Some(g)) => (u, g),
            _ => return,
        };
        match self.engine.refresh(user, tag) {
            Ok(report) => {
                let r = &report.reputation;
                println!(
                    "rep {}: basis={:.4} rewards={:.4} total={:.4} power={} weight={:.4} (v{}, {})",
                    who,
                    r.reputation_basis,
                    r.reputation_rewards,
                    r.reputation_total_effective,
                    r.has_voting_power,
                    r.vote_weight,
                    report.version,
                    if report.recomputed { "recomputed" } else { "cached" },
                );
                if report.skipped_votes > 0 {
                    println!("  {} vote(s) skipped", report.skipped_votes);
                }
            }
            Err(e) => eprintln!("rep failed: {}", e),
        }
    }

    fn cmd_phase(&self, tag: &str) {
        let key = match self.tag(tag) {
            Some(k) => k,
            None => return,
        };
        match self.engine.phase(key) {
            Ok(phase) => println!("tag {} is {:?}", tag, phase),
            Err(e) => eprintln!("phase failed: {}", e),
        }
    }

    fn cmd_advance(&mut self, months: f64) {
        self.clock.advance_months(months);
        println!("clock advanced {} month(s)", months);
    }

    /// Populate a tag with `n` users voting at random.
    fn cmd_seed(&mut self, tag: &str, n: usize) {
        let mut rng = rand::thread_rng();
        let first = self.users.len();
        for i in first..first + n {
            self.cmd_user(&format!("seed{}", i), &format!("Seed {}", i));
        }
        let handles: Vec<String> = self.users.keys().cloned().collect();
        if handles.len() < 2 {
            eprintln!("seed needs at least two users");
            return;
        }
        if !self.tags.contains_key(&tag.to_lowercase()) {
            let creator = handles[0].clone();
            self.cmd_tag(&creator, tag, None);
        }
        let key = match self.tag(tag) {
            Some(k) => k,
            None => return,
        };

        let mut cast = 0;
        for _ in 0..n * 2 {
            let pair: Vec<&String> = handles.choose_multiple(&mut rng, 2).collect();
            let (voter, target) = (self.users[pair[0]], self.users[pair[1]]);
            let value = if rng.gen_bool(0.8) { VoteValue::Up } else { VoteValue::Down };
            match self.engine.cast_vote(voter, target, key, value) {
                Ok(_) => cast += 1,
                Err(e) => warn!(error = %e, "seed vote failed"),
            }
            self.clock.advance_secs(rng.gen_range(60..86_400));
        }
        println!("seeded {} vote(s) in {}", cast, tag);
    }

    fn cmd_users(&self) {
        for (handle, key) in &self.users {
            println!("  {} {}", handle, key);
        }
    }
}

fn print_banner() {
    println!("Tag Reputation REPL");
    println!("commands:");
    println!("  user HANDLE [DISPLAY NAME...]");
    println!("  users");
    println!("  tag CREATOR HANDLE [MIN_USERS]");
    println!("  vote VOTER TARGET TAG +|-");
    println!("  unvote VOTER TARGET TAG");
    println!("  rep WHO TAG");
    println!("  phase TAG");
    println!("  advance MONTHS");
    println!("  seed TAG N");
    println!("  help");
    println!("  quit / exit");
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tag_reputation=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match EngineConfig::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("config {} failed: {}", path, e);
                std::process::exit(2);
            }
        },
        None => EngineConfig::default(),
    };

    let stdin = io::stdin();
    let mut demo = Demo::new(config);

    print_banner();

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0];

        match cmd {
            "quit" | "exit" => break,

            "help" => print_banner(),

            "user" => {
                if parts.len() < 2 {
                    eprintln!("usage: user HANDLE [DISPLAY NAME...]");
                } else {
                    let name = if parts.len() > 2 { parts[2..].join(" ") } else { parts[1].to_string() };
                    demo.cmd_user(parts[1], &name);
                }
            }

            "users" => demo.cmd_users(),

            "tag" => match parts.len() {
                3 => demo.cmd_tag(parts[1], parts[2], None),
                4 => match parts[3].parse() {
                    Ok(n) => demo.cmd_tag(parts[1], parts[2], Some(n)),
                    Err(e) => eprintln!("bad MIN_USERS {}: {}", parts[3], e),
                },
                _ => eprintln!("usage: tag CREATOR HANDLE [MIN_USERS]"),
            },

            "vote" => {
                if parts.len() != 5 {
                    eprintln!("usage: vote VOTER TARGET TAG +|-");
                } else {
                    match parts[4] {
                        "+" => demo.cmd_vote(parts[1], parts[2], parts[3], VoteValue::Up),
                        "-" => demo.cmd_vote(parts[1], parts[2], parts[3], VoteValue::Down),
                        other => eprintln!("vote value must be + or -, got {}", other),
                    }
                }
            }

            "unvote" => {
                if parts.len() != 4 {
                    eprintln!("usage: unvote VOTER TARGET TAG");
                } else {
                    demo.cmd_unvote(parts[1], parts[2], parts[3]);
                }
            }

            "rep" => {
                if parts.len() != 3 {
                    eprintln!("usage: rep WHO TAG");
                } else {
                    demo.cmd_rep(parts[1], parts[2]);
                }
            }

            "phase" => {
                if parts.len() != 2 {
                    eprintln!("usage: phase TAG");
                } else {
                    demo.cmd_phase(parts[1]);
                }
            }

            "advance" => {
                if parts.len() != 2 {
                    eprintln!("usage: advance MONTHS");
                } else {
                    match parts[1].parse::<f64>() {
                        Ok(m) if m.is_finite() && m >= 0.0 => demo.cmd_advance(m),
                        _ => eprintln!("bad MONTHS {}", parts[1]),
                    }
                }
            }

            "seed" => {
                if parts.len() != 3 {
                    eprintln!("usage: seed TAG N");
                } else {
                    match parts[2].parse::<usize>() {
                        Ok(n) => demo.cmd_seed(parts[1], n),
                        Err(e) => eprintln!("bad N {}: {}", parts[2], e),
                    }
                }
            }

            _ => {
                eprintln!("unknown command \"{}\"", cmd);
            }
        }
    }
}
