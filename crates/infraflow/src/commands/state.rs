use crate::project::{GlobalArgs, Project};
use crate::render;
use anyhow::bail;
use colored::Colorize;
use infraflow_cloud_local::local_schema;
use infraflow_core::NodeAddress;

pub async fn handle_list(args: &GlobalArgs) -> anyhow::Result<()> {
    let project = Project::load(args, Vec::new())?;
    let state = project.state_manager().load().await?;

    if state.resources.is_empty() {
        println!("{}", "状態ファイルにリソースはありません".dimmed());
        return Ok(());
    }

    println!(
        "{} serial {}, 更新 {}",
        "状態:".bold(),
        state.serial,
        state.updated_at.to_rfc3339()
    );
    for address in state.addresses() {
        if let Some(entry) = state.get_resource(&address) {
            println!("  {} {}", address.to_string().cyan(), entry.id.dimmed());
        }
    }
    Ok(())
}

pub async fn handle_show(args: &GlobalArgs, address: &str) -> anyhow::Result<()> {
    let Some(parsed) = NodeAddress::parse(address) else {
        bail!("アドレスの形式が正しくありません: {}", address);
    };

    let project = Project::load(args, Vec::new())?;
    let state = project.state_manager().load().await?;
    let Some(entry) = state.get_resource(&parsed) else {
        bail!("状態ファイルに {} はありません", address);
    };

    render::print_resource(&parsed, entry, &local_schema());
    Ok(())
}
