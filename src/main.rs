use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{fs, path::{Path, PathBuf}, process::ExitCode};
use tracing::info;
use tracing_subscriber::EnvFilter;

use smfkit::dump::{TrackSummary, format_seconds, hex_bytes, render_event};
use smfkit::writer::running_status_cancellation_ok;
use smfkit::{IncrementalReader, TimeModel, read_midifile, write_midifile};

const ABOUT: &str = "Dump a MIDI file as events, with tracks and relative ticks, and optionally \
real-time seconds and/or file position. The default mode decodes the whole file first. \
Incremental mode (-i) reads and dumps one event at a time, so malformed files can be \
inspected up to the point of failure.";

const EPILOG: &str = "\
Event output format:
  168.537 215  4  2 2   1439    8639  Off  C 3 4+2.998
[seconds][AAA  L] T C   RRRR    BBBB  ddddddd m+b
 AAA L = file byte address & length, present only with -i.
 T = track number, C = channel (when applicable)
 RRRR = relative tick stored in event, BBBB = track-accumulated absolute tick
 ddddd = event-specific data, m+b = measure and beat (beat 0 relative)
 seconds = real-time location of event, present only with -s.
 C 3 is standard pitch notation (an octave below middle C)";

const COLUMN_KEY: &str = "t# chn relT   absT  m+beat";

#[derive(Parser, Debug)]
#[command(name = "dumpmidi", about = ABOUT, after_help = EPILOG)]
struct Opt {
    /// Only show track summaries, no notes or other events.
    #[arg(short, long)]
    brief: bool,
    /// Check for channel messages relying on running status after a Meta or
    /// Sysex event. Exit status 2 if any are found.
    #[arg(short, long, conflicts_with_all = ["incremental", "hex", "brief", "seconds", "rewrite"])]
    check: bool,
    /// First measure number to dump.
    #[arg(short, long, value_name = "MEASURE", conflicts_with_all = ["check", "brief"])]
    from: Option<i64>,
    /// Last measure number to dump.
    #[arg(short, long, value_name = "MEASURE", conflicts_with_all = ["check", "brief"])]
    to: Option<i64>,
    /// Number of the first measure in the file (wrong for upbeats if left at 1).
    #[arg(short, long, value_name = "MEASURE", default_value_t = 1)]
    measure: i64,
    /// Read the file incrementally, showing event addresses and lengths.
    #[arg(short, long)]
    incremental: bool,
    /// Dump event bytes in hex as well.
    #[arg(short = 'x', long, requires = "incremental")]
    hex: bool,
    /// Show the real-time position of each event in seconds.
    #[arg(short, long)]
    seconds: bool,
    /// Only dump these tracks, e.g. 0,2,3.
    #[arg(
        short = 'T',
        long,
        value_delimiter = ',',
        conflicts_with_all = ["incremental", "check", "brief"]
    )]
    tracks: Vec<usize>,
    /// Rewrite the file to OUT with correct status bytes instead of dumping it.
    #[arg(long, value_name = "OUT", conflicts_with_all = ["incremental", "brief", "seconds"])]
    rewrite: Option<PathBuf>,
    /// MIDI file to dump.
    path: PathBuf,
}

impl Opt {
    fn in_window(&self, measure: i64) -> bool {
        self.from.is_none_or(|from| measure >= from) && self.to.is_none_or(|to| measure <= to)
    }

    fn past_window(&self, measure: i64) -> bool {
        self.to.is_some_and(|to| measure > to)
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::parse();
    let path = opt.path.as_path();
    let meta = fs::metadata(path).with_context(|| format!("file does not exist: {}", path.display()))?;

    if opt.check {
        return check(path);
    }
    if let Some(out) = &opt.rewrite {
        rewrite(path, out)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("MIDI file {}, {} bytes.", path.display(), meta.len());
    if opt.incremental {
        println!("Decoding in incremental mode.\n");
        dump_incrementally(&opt)?;
    } else {
        println!("Decoding in batch mode.\n");
        dump_batch(&opt)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn seconds_key(opt: &Opt) -> &'static str {
    if opt.seconds { "seconds " } else { "" }
}

fn dump_batch(opt: &Opt) -> Result<()> {
    let pattern = read_midifile(&opt.path)
        .with_context(|| format!("failed to decode {}", opt.path.display()))?;
    let model = TimeModel::from_pattern(&pattern, opt.measure).context("failed to build time model")?;

    println!(
        "Resolution {}, format {}, {} tracks.",
        pattern.resolution,
        pattern.format,
        pattern.tracks.len()
    );
    print!("{}", model.signature_report());
    if opt.seconds {
        print!("{}", model.tempo_report());
    }
    if let Some(end) = model.end_seconds() {
        println!("Length {}", format_seconds(end));
    }

    println!("\n{}{COLUMN_KEY}", seconds_key(opt));
    for (index, track) in pattern.tracks.iter().enumerate() {
        println!("{}", TrackSummary::of(index, track));
        if opt.brief || (!opt.tracks.is_empty() && !opt.tracks.contains(&index)) {
            continue;
        }
        println!();
        for (abs_tick, event) in track.absolute_events() {
            let at = model.ticks_to_measure_beat(abs_tick)?;
            if opt.past_window(at.measure) {
                break;
            }
            if !opt.in_window(at.measure) {
                continue;
            }
            if opt.seconds {
                print!("{:7.3} ", model.ticks_to_seconds(abs_tick)?);
            }
            println!("{}", render_event(index, abs_tick, event, at));
        }
    }
    Ok(())
}

fn dump_incrementally(opt: &Opt) -> Result<()> {
    let mut reader = IncrementalReader::open(&opt.path)
        .with_context(|| format!("failed to open {}", opt.path.display()))?;
    let header = reader.header();
    let mut model = TimeModel::new(header.resolution, opt.measure)?;
    let raw = if opt.hex { Some(fs::read(&opt.path)?) } else { None };

    println!(
        "{} tracks. Resolution={}, format {}",
        header.n_tracks, header.resolution, header.format
    );
    if !opt.brief {
        println!("{}fadr ln  {COLUMN_KEY}", seconds_key(opt));
    }
    while let Some(track) = reader.next_track()? {
        let info = track.info();
        if !opt.brief {
            println!();
        }
        println!("TRACK    {} @ byte {}, byte length {}", info.index, info.address, info.length);

        let mut abs_tick = 0;
        for item in track {
            let item = item.with_context(|| format!("while decoding track {}", info.index))?;
            abs_tick += item.event.tick;
            // Signature and tempo changes live in track 0.
            if info.index == 0 {
                model.process_event(abs_tick, &item.event)?;
            }
            let at = model.ticks_to_measure_beat(abs_tick)?;
            if !opt.in_window(at.measure) || opt.brief {
                continue;
            }
            if opt.seconds {
                print!("{:7.3} ", model.ticks_to_seconds(abs_tick)?);
            }
            print!("{:4} {:2}  ", item.address, item.length);
            println!("{}", render_event(usize::from(info.index), abs_tick, &item.event, at));
            if let Some(raw) = &raw {
                let start = item.address as usize;
                let bytes = raw.get(start..start + item.length as usize).unwrap_or_default();
                println!("   {:4}      {}", item.address, hex_bytes(bytes));
            }
        }
    }
    if reader.has_running_status_errors() {
        println!("\nFile relies on running status after Meta/Sysex events; --rewrite repairs it.");
    }
    Ok(())
}

fn check(path: &Path) -> Result<ExitCode> {
    let mut reader = IncrementalReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    while let Some(track) = reader.next_track()? {
        let index = track.info().index;
        for item in track {
            item.with_context(|| format!("while decoding track {index}"))?;
        }
    }
    if reader.has_running_status_errors() {
        println!("ERRORS: {} has one or more status byte problems.", path.display());
        Ok(ExitCode::from(2))
    } else {
        println!("OK:     {} has no status byte problems.", path.display());
        Ok(ExitCode::SUCCESS)
    }
}

fn rewrite(path: &Path, out: &Path) -> Result<()> {
    if !running_status_cancellation_ok() {
        bail!("encoder self-test failed: running status is not cancelled by Sysex");
    }
    let pattern = read_midifile(path).with_context(|| format!("failed to decode {}", path.display()))?;
    write_midifile(out, &pattern).with_context(|| format!("failed to write {}", out.display()))?;
    let before = fs::metadata(path)?.len();
    let after = fs::metadata(out)?.len();
    info!(before, after, "rewrote file");
    println!("Rewrote {} ({before} bytes) to {} ({after} bytes).", path.display(), out.display());
    Ok(())
}
