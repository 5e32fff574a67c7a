use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flowcanvas::{FlowCanvas, LoggingConfig, NodeKind};
use serde_json::json;

#[derive(Parser)]
#[command(name = "flowcanvas", version, about = "Flow canvas CLI", author)]
struct Cli {
    /// 输出调试日志
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 校验画布文件
    Validate { file: PathBuf },
    /// 输出画布结构
    Inspect {
        file: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = LoggingConfig::from_env();
    let verbose = cli.verbose || LoggingConfig::is_debug();
    logging.verbose(verbose).install();

    match cli.command {
        Command::Validate { file } => handle_validate(file)?,
        Command::Inspect { file, json } => handle_inspect(file, json)?,
    }
    Ok(())
}

fn handle_validate(file: PathBuf) -> anyhow::Result<()> {
    let canvas = FlowCanvas::from_path(&file)?;
    println!(
        "{}: ok (root `{}`, {} nodes)",
        file.display(),
        canvas.root(),
        canvas.user_nodes().count()
    );
    Ok(())
}

fn handle_inspect(file: PathBuf, as_json: bool) -> anyhow::Result<()> {
    let canvas = FlowCanvas::from_path(&file)?;

    if as_json {
        let nodes: Vec<_> = canvas
            .nodes()
            .map(|node| {
                json!({
                    "id": node.id,
                    "type": node.kind.type_name(),
                    "next": node.successors(),
                })
            })
            .collect();
        let summary = json!({ "root": canvas.root(), "nodes": nodes });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("root: {}", canvas.root());
    for node in canvas.nodes() {
        let detail = match &node.kind {
            NodeKind::Tool(tool) => format!(" tool={}", tool.tool),
            NodeKind::LanguageModel(llm) => format!(" model={}", llm.model),
            NodeKind::Reference(reference) => format!(" source={}", reference.source),
            NodeKind::Parallel(parallel) => format!(" branches={}", parallel.branches.len()),
            NodeKind::Loop(loop_node) => {
                format!(" body={} max={}", loop_node.body, loop_node.max_iterations)
            }
            NodeKind::Start | NodeKind::End | NodeKind::NoOp => String::new(),
        };
        println!(
            "  {} [{}]{} -> {}",
            node.id,
            node.kind.type_name(),
            detail,
            node.successors().join(", ")
        );
    }
    Ok(())
}
