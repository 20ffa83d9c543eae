//! naevis backend entry point.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    naevis_runtime::init_tracing()?;
    naevis_runtime::run().await
}
