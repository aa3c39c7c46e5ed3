//! Actor-based relay core
//!
//! Each source and each output runs as an independent tokio task. Tasks never talk to
//! each other directly: sources publish to bus topics, outputs subscribe to them.
//!
//! ## Architecture Overview
//!
//! ```text
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ SourceActor  │   │ SourceActor  │   │ SourceActor  │
//!   │ (AWX API)    │   │ (webhook)    │   │ (InfluxDB)   │
//!   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!          │ <PREFIX>_CHANGES / _INFO / _ERROR   │
//!          └──────────────────┼──────────────────┘
//!                             ▼
//!                    ┌─────────────────┐
//!                    │   MessageBus    │◄──── AWX_IN ("<detail>;<depth>")
//!                    └────────┬────────┘                 ▲
//!                             │ subscribe                │
//!            ┌────────────────┼────────────────┐         │
//!            ▼                ▼                ▼         │
//!   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐ │
//!   │ OutputRunner │  │ OutputRunner │  │ OutputRunner │ │
//!   │ (Telegram) ──┼──┼─ CommandRouter ─┼──────────────┼─┘
//!   └──────────────┘  │ (Alerta)     │  │ (Discord)    │
//!                     └──────────────┘  └──────────────┘
//! ```
//!
//! ## Shutdown
//!
//! All tasks share one `CancellationToken`. Each loop checks it between units of work
//! (one poll cycle, one delivered message) and exits on its own; nothing is aborted.

pub mod output;
pub mod source;
