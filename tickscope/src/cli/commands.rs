//! Subcommand runners

// Time conversions lose precision for display
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;

use crate::analysis::analyze_hotspots;
use crate::cli::args::{ClockArg, ModeArg, SessionArgs};
use crate::domain::{Pid, SamplerError, ThreadId};
use crate::export::Report;
use crate::jfr::JfrReader;
use crate::profiler::Profiler;
use crate::sampler::{
    EnginePreference, ProcThreadSource, RecordingFileProfiler, SamplerMode, SamplerSettings,
};

/// Replay a recording through the native engine.
///
/// # Errors
/// Returns an error if the recording is missing or unreadable
pub fn analyze(
    recording: &Path,
    mode: ModeArg,
    clock: ClockArg,
    session: &SessionArgs,
    quiet: bool,
) -> Result<()> {
    if !recording.is_file() {
        bail!("Recording not found: {}", recording.display());
    }
    let profiler = Profiler::builder()
        .native(Arc::new(RecordingFileProfiler::new(recording, clock.into())))
        .build();
    let settings = session.to_settings(mode.into())?;

    let _handle = profiler
        .start_sampling(settings_with_engine(settings, EnginePreference::Native))
        .context("Failed to start native engine")?;
    let report = profiler
        .stop_sampling()
        .with_context(|| format!("Failed to read {}", recording.display()))?;

    if report.metadata.incomplete_recording {
        eprintln!("warning: recording ends inside a chunk, only part of it was read");
    }
    finish(&report, session, quiet)
}

/// Poll a live process until Ctrl+C, the duration limit or process exit.
///
/// # Errors
/// Returns an error if the process cannot be sampled
pub async fn sample(pid: u32, duration: u64, session: &SessionArgs, quiet: bool) -> Result<()> {
    let proc_path = PathBuf::from(format!("/proc/{pid}"));
    if !proc_path.exists() {
        bail!("Process {} not found", Pid(pid));
    }

    let mut source = ProcThreadSource::new(Pid(pid));
    if !session.thread_ids.is_empty() {
        source = source.with_threads(session.thread_ids.iter().copied().map(ThreadId));
    }
    let profiler = Profiler::builder().thread_source(Arc::new(source)).build();

    let mut settings = settings_with_engine(
        session.to_settings(SamplerMode::Execution)?,
        EnginePreference::ThreadDump,
    );
    settings.auto_end = (duration > 0).then(|| Duration::from_secs(duration));

    let handle = profiler
        .start_sampling(settings)
        .with_context(|| format!("Failed to start sampling {}", Pid(pid)))?;
    if !quiet {
        println!("tickscope v{}", env!("CARGO_PKG_VERSION"));
        println!("pid: {pid}");
        println!("interval: {}ms", session.interval_ms);
    }

    let wait = handle.wait();
    tokio::pin!(wait);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Track why we exited the loop
    let mut exit_reason = "interrupted";
    let ended = loop {
        tokio::select! {
            outcome = &mut wait => {
                exit_reason = "duration limit reached";
                break Some(outcome);
            }
            _ = &mut ctrl_c => break None,
            () = tokio::time::sleep(Duration::from_millis(500)) => {
                if !proc_path.exists() {
                    exit_reason = "process exited";
                    break None;
                }
            }
        }
    };

    let report = match ended {
        Some(outcome) => outcome.context("Sampler ended without a report")?,
        None => match profiler.stop_sampling() {
            Ok(report) => report,
            // The timer won the race
            Err(SamplerError::NotRunning) => wait.await.context("Sampler ended without a report")?,
            Err(e) => return Err(e).context("Failed to stop sampler"),
        },
    };

    if !quiet {
        let elapsed = report.metadata.end_millis.saturating_sub(report.metadata.start_millis);
        eprintln!(
            "\n{exit_reason}: {:.1}s, {} samples recorded, {} dropped",
            elapsed as f64 / 1000.0,
            report.metadata.samples.recorded,
            report.metadata.samples.dropped,
        );
    }
    finish(&report, session, quiet)
}

/// Print a summary of a recording's chunks and events.
///
/// # Errors
/// Returns an error if the recording cannot be read
pub fn info(recording: &Path) -> Result<()> {
    let mut reader = JfrReader::open(recording)
        .with_context(|| format!("Failed to open {}", recording.display()))?;
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut threads: BTreeMap<u32, String> = BTreeMap::new();

    loop {
        match reader.read_event() {
            Ok(Some(event)) => {
                *counts.entry(format!("{:?}", event.class())).or_insert(0) += 1;
                if let Some(tid) = event.tid() {
                    threads.entry(tid).or_insert_with(|| {
                        reader.thread_name(tid).unwrap_or("?").to_string()
                    });
                }
            }
            Ok(None) if reader.eof() => break,
            Ok(None) => {}
            Err(e) if e.is_incomplete() => {
                eprintln!("warning: {e}");
                break;
            }
            Err(e) => return Err(e).context("Malformed recording"),
        }
    }

    let chunk = reader.chunk();
    println!("recording: {}", recording.display());
    println!("version: {}.{}", chunk.major_version, chunk.minor_version);
    println!("chunks: {}", reader.generation());
    println!("duration: {:.3}s", reader.duration_nanos() as f64 / 1e9);
    println!("ticks/s: {}", chunk.ticks_per_second);
    println!("incomplete: {}", reader.incomplete());
    println!("threads: {}", threads.len());
    for (class, count) in &counts {
        println!("  {class:<16} {count}");
    }
    for (setting, value) in reader.settings() {
        info!("setting {setting} = {value}");
    }
    Ok(())
}

fn settings_with_engine(mut settings: SamplerSettings, engine: EnginePreference) -> SamplerSettings {
    settings.engine = engine;
    settings
}

fn finish(report: &Report, session: &SessionArgs, quiet: bool) -> Result<()> {
    if !quiet {
        print_hotspots(report, session.top);
    }
    if let Some(path) = &session.export {
        report
            .write_json(path)
            .with_context(|| format!("Failed to export report to {}", path.display()))?;
        if !quiet {
            println!("saved: {}", path.display());
        }
    }
    Ok(())
}

fn print_hotspots(report: &Report, top: usize) {
    println!(
        "{} thread groups, {} windows, engine {}",
        report.threads.len(),
        report.windows.len(),
        report.metadata.engine
    );
    let hotspots = analyze_hotspots(report);
    if hotspots.is_empty() {
        println!("no samples");
        return;
    }
    println!("{:>7}  {:>7}  METHOD", "SELF", "TOTAL");
    for hotspot in hotspots.iter().take(top) {
        println!(
            "{:>6.1}%  {:>6.1}%  {}",
            hotspot.percentage, hotspot.total_percentage, hotspot.name
        );
    }
}
