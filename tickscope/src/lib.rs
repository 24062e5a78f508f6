//! # tickscope - Sampling Profiler for Tick-Driven Runtimes
//!
//! tickscope captures execution or allocation samples from a running
//! process, merges the per-thread stacks into one call tree per thread
//! group over rolling time windows, and exports the result as a JSON
//! report for later viewing. Alongside sampling it keeps rolling tick
//! (TPS / MSPT) and ping statistics fed by the embedding platform.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Embedding Platform                          │
//! │        (tick loop, player pings, commands, uploader)            │
//! └──────────┬──────────────────────┬───────────────────────────────┘
//!            │ tick_start/tick_end  │ start/stop/cancel
//!            ▼                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      tickscope (This Crate)                     │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │   TickHook   │──▶│    Stats     │   │   Profiler   │       │
//! │  │  (listeners) │   │ (TPS, MSPT)  │   │   (facade)   │       │
//! │  └──────┬───────┘   └──────────────┘   └──────┬───────┘       │
//! │         │ long ticks                          │ session       │
//! │         ▼                                     ▼               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │  TickFeed    │──▶│  Processor   │◀──│   Engines    │       │
//! │  │  (filter)    │   │ (filters)    │   │ (dump/native)│       │
//! │  └──────────────┘   └──────┬───────┘   └──────┬───────┘       │
//! │                            │                  │ recording     │
//! │                            ▼                  ▼               │
//! │                     ┌──────────────┐   ┌──────────────┐       │
//! │                     │  Call Tree   │   │  JFR Reader  │       │
//! │                     │  (windows)   │   │  (chunks)    │       │
//! │                     └──────┬───────┘   └──────────────┘       │
//! │                            ▼                                  │
//! │                     ┌──────────────┐   ┌──────────────┐       │
//! │                     │    Export    │──▶│   Analysis   │       │
//! │                     │ (report.json)│   │  (Hotspots)  │       │
//! │                     └──────────────┘   └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`jfr`]: Reader for chunked, constant-pool based recording files
//!   - Varint cursor, per-chunk metadata schema, delta-chained constant pools
//!   - Stack trace resolution to [`trace_data::StackFrame`]s
//!
//! - [`grouping`]: Which threads are sampled and how they are grouped
//!
//! - [`aggregation`]: Merged call trees with per-window weights, the
//!   long-tick sample filter and window arithmetic
//!
//! - [`sampler`]: Capture engines, the sample processor and the session
//!   state machine (`Created → Running → Completed | Cancelled | TimedOut`)
//!
//! - [`profiler`]: Facade choosing engines and enforcing one active session
//!
//! ### Statistics
//!
//! - [`tick`]: Tick hook, listener registry and long-tick monitor
//! - [`stats`]: Rolling averages, TPS/MSPT, ping and recording system stats
//!
//! ### Output and Data Modules
//!
//! - [`export`]: Immutable JSON report with source attribution
//! - [`analysis`]: Self-time hotspots over a report
//! - [`cli`]: Command-line argument parsing and subcommands
//! - [`trace_data`]: Stack frames and thread samples
//! - [`classification`]: Frame kinds and sleeping/native filters
//! - [`domain`]: Core domain types (Pid, ThreadId, Timestamp, WindowIndex) and errors
//!
//! ## Capture Engines
//!
//! ### 1. Thread Dumps
//! - Polls a [`sampler::ThreadSampleSource`] every interval on a background thread
//! - **Pros**: Works everywhere a thread list is available
//! - **Cons**: Skewed toward safepoints, coarse intervals
//!
//! ### 2. Native Recording
//! - Drives an external profiler and reads its recording when stopped
//! - **Pros**: Low overhead, allocation sampling, CPU/GC statistics
//! - **Cons**: Needs the profiler to be available; tick filtering needs a
//!   monotonic recording clock
//!
//! ## Typical Usage
//!
//! ```bash
//! # Hotspots of an existing recording
//! tickscope analyze app.jfr --top 20
//!
//! # Sample a live process for 30 seconds and save the report
//! tickscope sample --pid <PID> --duration 30 --export report.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Tick**: One iteration of the host's main loop; long ticks are lag
//! - **Window**: Wall-clock bucket (default 60 s) weights are recorded under
//! - **Thread group**: Threads merged into one tree by the grouper
//! - **Chunk**: Self-contained section of a recording with its own pools

pub mod aggregation;
pub mod analysis;
pub mod classification;
pub mod cli;
pub mod domain;
pub mod export;
pub mod grouping;
pub mod jfr;
pub mod profiler;
pub mod sampler;
pub mod stats;
pub mod tick;
pub mod trace_data;
