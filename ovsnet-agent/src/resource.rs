use ovsnet_resources::{ResourceAllocator, ResourceRegistry};
use tracing::info;

use crate::Result;
use crate::agent::open_state;
use crate::config::{ResourceArgs, ResourceCommand};

pub async fn run(args: ResourceArgs) -> Result<()> {
    let state = open_state(&args.store).await?;
    let allocator = ResourceAllocator::new(state, ResourceRegistry::default());
    if let Some(out) = execute(&allocator, args.command).await? {
        println!("{out}");
    }
    Ok(())
}

/// Applies one resource command and returns what should be printed.
pub async fn execute(
    allocator: &ResourceAllocator,
    command: ResourceCommand,
) -> Result<Option<String>> {
    match command {
        ResourceCommand::Define { id, kind, config } => {
            let config: serde_json::Value = serde_json::from_str(&config)?;
            allocator.define_resource(&id, kind, config).await?;
            info!(%id, %kind, "resource defined");
            Ok(None)
        }
        ResourceCommand::Undefine { id, kind } => {
            allocator.undefine_resource(&id, kind).await?;
            info!(%id, %kind, "resource undefined");
            Ok(None)
        }
        ResourceCommand::Allocate { id, kind } => {
            let value = allocator.allocate_resource_val(&id, kind).await?;
            Ok(Some(value.to_string()))
        }
        ResourceCommand::Deallocate { id, kind, value } => {
            allocator.deallocate_resource_val(&id, kind, &value).await?;
            info!(%id, %kind, %value, "resource value released");
            Ok(None)
        }
        ResourceCommand::Show { id, kind } => {
            let record = allocator.get(&id, kind).await?;
            Ok(Some(serde_json::to_string_pretty(&record)?))
        }
    }
}
