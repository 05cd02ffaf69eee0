use parley_core::Paths;

use super::open_store;

pub async fn clear(session: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let store = open_store(&paths)?;
    store.clear_thread(session).await?;
    println!("✓ History cleared for {}", session);
    Ok(())
}
