use crate::context::AppContext;
use anyhow::{anyhow, Result};

/// Prints the stored summary row for a finished task as pretty JSON.
pub async fn run(app: &AppContext, task_id: i64) -> Result<()> {
    let db = app.database().await?;
    let Some(result) = db.get_result_json(task_id).await? else {
        return Err(anyhow!("no stored result for backtest task {}", task_id));
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
