//! PaaS Agent - 单机容器部署代理
//!
//! Usage:
//! - Serve mode (default): `paas-agent` / `paas-agent serve`
//! - With custom port: `paas-agent --port 19999`
//! - One-shot deploy: `paas-agent deploy web registry.local/web:v2 --container-port 8080 --env MODE=prod`
//! - One heal cycle: `paas-agent heal`

use std::process::ExitCode;
use std::time::Duration;

use paas_agent::domain::DeployRequest;
use paas_agent::RuntimeConfig;

/// 子命令
enum Command {
    Serve,
    Deploy(DeployRequest),
    Heal,
}

/// 解析命令行参数
fn parse_args(args: &[String]) -> Result<(RuntimeConfig, Command), String> {
    let mut config = RuntimeConfig::default();
    let mut positional: Vec<&str> = Vec::new();
    let mut container_port: Option<u16> = None;
    let mut env: Vec<(String, String)> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = Some(parse_number(&args[i + 1], "--port")?);
                i += 2;
            }
            "--interval" if i + 1 < args.len() => {
                let secs: u64 = parse_number(&args[i + 1], "--interval")?;
                if secs == 0 {
                    return Err("--interval must be at least 1 second".to_string());
                }
                config.interval_override = Some(Duration::from_secs(secs));
                i += 2;
            }
            "--no-healer" => {
                config.disable_healer = true;
                i += 1;
            }
            "--container-port" if i + 1 < args.len() => {
                container_port = Some(parse_number(&args[i + 1], "--container-port")?);
                i += 2;
            }
            "--env" if i + 1 < args.len() => {
                let (key, value) = args[i + 1]
                    .split_once('=')
                    .filter(|(k, _)| !k.is_empty())
                    .ok_or_else(|| format!("invalid --env value '{}', expected KEY=VALUE", args[i + 1]))?;
                env.push((key.to_string(), value.to_string()));
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown or incomplete option '{}'", other));
            }
            other => {
                positional.push(other);
                i += 1;
            }
        }
    }

    let command = match positional.as_slice() {
        [] | ["serve"] => Command::Serve,
        ["heal"] => Command::Heal,
        ["deploy", app, image] => {
            let mut request = DeployRequest::new(*app, *image);
            request.container_port = container_port;
            for (key, value) in env {
                request = request.with_env(key, value);
            }
            Command::Deploy(request)
        }
        ["deploy", ..] => return Err("usage: paas-agent deploy <app> <image>".to_string()),
        [other, ..] => return Err(format!("unknown command '{}'", other)),
    };

    Ok((config, command))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value '{}' for {}", value, flag))
}

fn print_help() {
    println!("PaaS Agent - 单机容器部署代理");
    println!();
    println!("USAGE:");
    println!("    paas-agent [OPTIONS] [COMMAND]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>             Override the status API port");
    println!("    --interval <SECS>         Override the self-healing interval");
    println!("    --no-healer               Do not run the self-healing daemon");
    println!("    --container-port <PORT>   Container port to publish (deploy)");
    println!("    --env <KEY=VALUE>         Environment variable, repeatable (deploy)");
    println!("    -h, --help                Print help information");
    println!();
    println!("COMMANDS:");
    println!("    serve                     Run the daemon and status API (default)");
    println!("    deploy <APP> <IMAGE>      Deploy with health check and rollback");
    println!("    heal                      Run one self-healing cycle");
    println!();
    println!("EXAMPLES:");
    println!("    paas-agent --port 19999");
    println!("    paas-agent deploy web registry.local/web:v2 --container-port 8080");
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let (config, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run with --help for usage");
            return ExitCode::from(2);
        }
    };

    paas_agent::init_tracing();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(async {
        match command {
            Command::Serve => match paas_agent::run_agent(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "Agent failed");
                    ExitCode::FAILURE
                }
            },
            Command::Deploy(request) => match paas_agent::deploy_once(config, request).await {
                Ok(outcome) => {
                    match serde_json::to_string_pretty(&outcome) {
                        Ok(json) => println!("{}", json),
                        Err(e) => eprintln!("Failed to encode outcome: {}", e),
                    }
                    if outcome.is_ok() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Deploy failed to start");
                    ExitCode::FAILURE
                }
            },
            Command::Heal => match paas_agent::heal_once(config).await {
                Ok(healed) => {
                    for instance in &healed {
                        println!("{}", instance.id);
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(error = %e, "Heal cycle failed to start");
                    ExitCode::FAILURE
                }
            },
        }
    })
}
