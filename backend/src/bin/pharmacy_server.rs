//! Pharmacy (requesting) service

use medstock::ServiceKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medstock::run(ServiceKind::Pharmacy).await
}
