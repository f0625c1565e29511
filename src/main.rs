use bsor::analytics::{AnalyticsOptions, DecodedReplayResponse};
use bsor::cursor::StringLimits;
use bsor::decoder::{decode_many, decode_with, DecodeOptions};
use bsor::transport::{Resolver, ResolverConfig};
use bsor::Replay;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "bsor", about = "Decode and analyse .bsor replays")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[command(flatten)]
    opts: GlobalOpts,
}

#[derive(Args)]
struct GlobalOpts {
    /// Log decoder and transport detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Score API base URL
    #[arg(long, global = true, default_value = bsor::transport::DEFAULT_API_BASE)]
    api_base: String,
    /// HTTP timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,
    /// Maximum one-byte resync steps per string
    #[arg(long, global = true, default_value = "1024")]
    max_resync: usize,
    /// Do not merge trick-replay samples into frames
    #[arg(long, global = true)]
    no_tricks: bool,
    /// Swing-speed window in seconds
    #[arg(long, global = true, default_value = "2.0")]
    window: f32,
}

#[derive(Subcommand)]
enum Commands {
    /// Show replay metadata
    Info {
        /// Local file, score id, or .bsor URL
        source: String,
    },
    /// Show the cut histogram and swing-speed series
    Stats {
        source: String,
    },
    /// Print the decoded replay and analytics as JSON
    Dump {
        source: String,
        #[arg(short, long)]
        pretty: bool,
    },
    /// Decode many local files and summarise each
    Batch {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.opts.verbose);

    let decode_opts = DecodeOptions {
        string_limits: StringLimits { max_resync: cli.opts.max_resync, ..Default::default() },
        merge_tricks:  !cli.opts.no_tricks,
        ..Default::default()
    };
    let analytics_opts = AnalyticsOptions { swing_window_seconds: cli.opts.window };
    let resolver_config = ResolverConfig {
        api_base: cli.opts.api_base.clone(),
        timeout:  Duration::from_secs(cli.opts.timeout),
        ..Default::default()
    };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { source } => {
            let bytes = load_bytes(&source, &resolver_config)?;
            let replay = decode_with(&bytes, &decode_opts)?;
            print_info(&source, bytes.len(), &replay);
        }

        // ── Stats ────────────────────────────────────────────────────────────
        Commands::Stats { source } => {
            let bytes = load_bytes(&source, &resolver_config)?;
            let replay = decode_with(&bytes, &decode_opts)?;
            let resp = DecodedReplayResponse::from_replay(replay, &analytics_opts);

            println!("Length: {:.1} s", resp.replay_length_seconds);
            println!();
            println!("{:>5} {:>7}", "Score", "Count");
            for bucket in &resp.cut_distribution {
                println!("{:>5} {:>7}", bucket.score, bucket.count);
            }
            println!();
            println!("{:>8} {:>10} {:>10}", "Time", "Left m/s", "Right m/s");
            for point in &resp.swing_speed {
                println!("{:>8.1} {:>10.3} {:>10.3}", point.time, point.left, point.right);
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { source, pretty } => {
            let bytes = load_bytes(&source, &resolver_config)?;
            let replay = decode_with(&bytes, &decode_opts)?;
            let resp = DecodedReplayResponse::from_replay(replay, &analytics_opts);
            let json = if pretty {
                serde_json::to_string_pretty(&resp)?
            } else {
                serde_json::to_string(&resp)?
            };
            println!("{json}");
        }

        // ── Batch ────────────────────────────────────────────────────────────
        Commands::Batch { input } => {
            let buffers = input
                .iter()
                .map(std::fs::read)
                .collect::<Result<Vec<_>, _>>()?;
            let results = decode_many(&buffers, &decode_opts);
            println!("{:<32} {:<24} {:<28} {:>6} {:>7}", "File", "Player", "Song", "Notes", "Frames");
            for (path, result) in input.iter().zip(results) {
                let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                match result {
                    Ok(replay) => {
                        let (player, song) = replay
                            .info
                            .as_ref()
                            .map(|i| (i.player_name.as_str(), i.song_name.as_str()))
                            .unwrap_or(("-", "-"));
                        println!("{:<32} {:<24} {:<28} {:>6} {:>7}",
                            name, player, song, replay.notes.len(), replay.frames.len());
                    }
                    Err(e) => println!("{:<32} error: {}", name, e),
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// A path that exists is read from disk; anything else goes to the resolver.
fn load_bytes(source: &str, config: &ResolverConfig) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let path = Path::new(source);
    if path.is_file() {
        return Ok(std::fs::read(path)?);
    }
    let resolver = Resolver::with_reqwest(config.clone())?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(rt.block_on(resolver.resolve(source))?)
}

fn print_info(source: &str, size: usize, replay: &Replay) {
    println!("── .bsor Replay ─────────────────────────────────────────");
    println!("  Source         {}", source);
    println!("  Size           {} B", size);
    if let Some(info) = &replay.info {
        let when = info
            .timestamp_utc()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| info.timestamp.clone());
        println!("  Player         {} ({})", info.player_name, info.player_id);
        println!("  Song           {} [{} {}] by {}", info.song_name, info.mode, info.difficulty, info.mapper);
        println!("  Hash           {}", info.hash);
        println!("  Score          {}", info.score);
        println!("  Modifiers      {}", info.modifier_list().join(" "));
        println!("  Recorded       {}", when);
        println!("  Mod version    {} (game {})", info.version, info.game_version);
        println!("  Hardware       {} / {} / {} on {}", info.hmd, info.controller, info.tracking_system, info.platform);
        if info.failed() {
            println!("  Failed at      {:.2} s", info.fail_time);
        }
    }
    println!("  Frames         {}", replay.frames.len());
    let notes: Vec<String> = replay
        .note_count_by_type()
        .into_iter()
        .map(|(kind, n)| format!("{} {}", n, kind.name()))
        .collect();
    println!("  Notes          {} ({})", replay.notes.len(), notes.join(", "));
    println!("  Walls          {}", replay.walls.len());
    println!("  Pauses         {}", replay.pauses.len());
    if let Some(hb) = replay.heartbeat() {
        let avg = hb.average_bpm().map(|b| format!("{b:.0} bpm")).unwrap_or_else(|| "-".into());
        println!("  Heart rate     {} samples, avg {} ({})", hb.data.len(), avg, hb.device);
    }
    if let Some(t) = replay.tricks() {
        println!("  Trick frames   {} left, {} right", t.left.frame_count(), t.right.frame_count());
    }
    if !replay.custom_data.is_empty() {
        println!("  Custom data ({}):", replay.custom_data.len());
        for (key, blob) in &replay.custom_data {
            let kind = if replay.parsed_custom_data.contains_key(key) {
                "decoded".to_string()
            } else {
                hex::encode(&blob[..blob.len().min(8)])
            };
            println!("    {:<28} {:>8} B  {}", key, blob.len(), kind);
        }
    }
}
