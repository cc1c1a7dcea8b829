mod data;
mod logging;
mod messaging;
mod models;
mod scenario;
mod simulation;

use clap::{Arg, Command};
use logging::{LogConfig, LogOutput, init_logging, parse_log_level};
use scenario::*;
use simulation::SimulationEngine;

fn main() {
    let matches = Command::new("dronesim")
        .version("0.1.0")
        .about("交通監視ドローンシミュレーション (Drone Fleet Simulation)")
        .long_about("ディスパッチャがドローンにルートを配信し、ドローンが駅周辺の\n\
                     交通状況を報告するメッセージ駆動シミュレーションです。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)。シナリオの設定より優先")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .value_parser(|s: &str| s.parse::<LogOutput>())
                .help("ログ出力先 (console, file, both)。シナリオの設定より優先")
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");

    let Some(scenario_path) = matches.get_one::<String>("scenario") else {
        show_default_help();
        return;
    };

    let overrides = LogOverrides {
        level: matches.get_one::<String>("log-level").cloned(),
        output: matches.get_one::<LogOutput>("log-output").copied(),
    };

    if let Err(e) = run_scenario(scenario_path, matches.get_flag("info"), verbose_level, overrides) {
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}

/// コマンドラインで指定されたログ設定
struct LogOverrides {
    level: Option<String>,
    output: Option<LogOutput>,
}

/// シナリオファイルを読み込んで実行
fn run_scenario(
    scenario_path: &str,
    info_only: bool,
    verbose_level: u8,
    overrides: LogOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = ScenarioConfig::from_file(scenario_path)?;

    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    let mut log_config = LogConfig::from_scenario(&scenario.logging)?;
    if let Some(level) = overrides.level {
        log_config.level = parse_log_level(&level);
    }
    if let Some(output) = overrides.output {
        log_config.output = output;
    }
    let _guard = init_logging(log_config)?;

    scenario.print_summary();
    println!();

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;
    let summary = simulation.run()?;

    println!();
    summary.print();
    Ok(())
}

/// デフォルトヘルプを表示
fn show_default_help() {
    println!("使用方法:");
    println!("  dronesim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>     シナリオファイルを指定して実行");
    println!("  -i, --info                シナリオ情報のみ表示");
    println!("  -v, --verbose             詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-level <LEVEL>   ログレベルを指定");
    println!("      --log-output <OUTPUT> ログ出力先を指定");
    println!("  -h, --help                このヘルプを表示");
    println!();
    println!("例:");
    println!("  dronesim -s scenarios/london.yaml");
    println!("  dronesim -s scenarios/london.yaml -i");
    println!("  RUST_LOG=dronesim=debug dronesim -s scenarios/london.yaml");
}
