use super::{colorize_outcome, json_pretty, runtime, StateDir, EXIT_SUCCESS};
use kapply_store::{
    compute_status, InventoryInfo, InventoryStorage, ResourceStatus, ResourceStore, Status,
};
use std::path::Path;

pub fn run(state_dir: &Path, inventory: &InventoryInfo, json: bool) -> Result<u8, String> {
    let state = StateDir::open(state_dir)?;
    let rt = runtime()?;
    let statuses = rt.block_on(async {
        let record = state
            .inventory
            .load(inventory)
            .await
            .map_err(|e| format!("store error: {e}"))?;
        let Some(record) = record else {
            return Ok(Vec::new());
        };
        let mut statuses = Vec::with_capacity(record.objects.len());
        for id in &record.objects {
            let status = match state.store.get(id).await {
                Ok(resource) => {
                    let (status, message) = compute_status(&resource);
                    ResourceStatus::new(id.clone(), status).with_message(message)
                }
                Err(e) if e.is_not_found() => ResourceStatus::new(id.clone(), Status::NotFound),
                Err(e) => {
                    ResourceStatus::new(id.clone(), Status::Unknown).with_message(e.to_string())
                }
            };
            statuses.push(status);
        }
        Ok::<_, String>(statuses)
    })?;

    if json {
        println!("{}", json_pretty(&statuses)?);
    } else if statuses.is_empty() {
        println!("inventory {} tracks no objects", inventory.key());
    } else {
        println!("{:<12} OBJECT", "STATUS");
        for s in &statuses {
            let label = s.status.to_string();
            let pad = " ".repeat(12usize.saturating_sub(label.len()));
            println!("{}{pad} {}", colorize_outcome(&label), s.id);
        }
    }
    Ok(EXIT_SUCCESS)
}
