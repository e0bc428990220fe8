//! Air-Quality Worker Service - Entry Point
//!
//! Background worker that fetches readings, maintains the tiered store,
//! aggregates daily statistics, and dispatches alerts.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    aq_worker::run().await
}
