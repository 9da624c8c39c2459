use anyhow::{Context, Result};
use env_logger::Env;
use sketch_explain::audio_input::CpalDevice;
use sketch_explain::audio_output::{CpalReplyPlayer, NullPlayer, ReplyPlayer};
use sketch_explain::catalog::{ConceptCatalog, HttpCatalog, StaticCatalog};
use sketch_explain::config::Config;
use sketch_explain::error::CaptureError;
use sketch_explain::orchestrator::{CaptureOrchestrator, DoneOutcome, OrchestratorEvent};
use sketch_explain::submission::HttpSubmissionClient;
use sketch_explain::types::{Point, PointerEvent, Tool};
use std::io::BufRead;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

const HELP: &str = "\
コマンド:
  concepts                 コンセプト一覧を取得して表示
  select <id>              コンセプトを選択
  start                    説明（録音）を開始
  stroke x y x y ...       キャンバスに線を描く（表示座標）
  pen | eraser             ツールを切り替え
  clear                    キャンバスを消す
  resize <w> <h>           表示サイズを設定
  done                     説明を終えて評価に送る
  cancel                   説明を取り消す
  continue                 同じコンセプトでもう一度
  next                     次のコンセプトへ
  status                   状態を表示
  quit                     終了";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-interfaces" {
        let config = Config::default();
        CpalDevice::list_devices(&config.audio.excluded_devices)?;
        CpalReplyPlayer::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        &args[1]
    } else {
        "config.toml"
    };

    // ログレベルは設定ファイルに従うので、ロガーより先に読み込む
    let config_exists = Path::new(config_path).exists();
    let config = if config_exists {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(config.output.log_level.as_str()))
        .format_timestamp(None)
        .filter_module("flacenc", log::LevelFilter::Off)
        .filter_module("symphonia", log::LevelFilter::Off)
        .init();

    if !config_exists {
        log::warn!("設定ファイルが見つかりません。デフォルト設定を使用します: {}", config_path);
    }

    log::info!("sketch-explain を起動します");
    log::debug!("設定: {:?}", config);

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let catalog: Box<dyn ConceptCatalog> = if config.concepts.is_empty() {
        Box::new(HttpCatalog::new(&config.submission)?)
    } else {
        Box::new(StaticCatalog::new(config.concepts.clone()))
    };

    let player: Box<dyn ReplyPlayer> = if config.playback.enabled {
        match CpalReplyPlayer::new(&config.playback) {
            Ok(player) => Box::new(player),
            Err(e) => {
                log::warn!("出力デバイスを開けないため返答音声は再生しません: {:#}", e);
                Box::new(NullPlayer)
            }
        }
    } else {
        Box::new(NullPlayer)
    };

    let client = Arc::new(
        HttpSubmissionClient::new(&config.submission).context("評価サービスクライアントの初期化に失敗")?,
    );

    let mut orch = CaptureOrchestrator::new(
        &config,
        Box::new(CpalDevice::new(&config.audio)),
        client,
        player,
    );
    orch.resize(config.canvas.width, config.canvas.height);

    match catalog.concepts().await {
        Ok(concepts) => orch.set_concepts(concepts),
        Err(e) => log::warn!("コンセプト一覧を取得できません: {:#}", e),
    }

    // 標準入力は専用スレッドで読む（ランタイム停止を妨げないため）
    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("{}", HELP);

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                match run_command(&mut orch, catalog.as_ref(), line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => report_error(&e),
                }
            }
            event = orch.next_event() => {
                let resolved = matches!(event, OrchestratorEvent::Submission { .. });
                orch.handle_event(event);
                if resolved {
                    print_feedback(&orch);
                }
            }
            _ = ticker.tick() => {}
        }
    }

    // クリーンアップ
    log::info!("停止処理を開始します...");
    orch.shutdown();
    log::info!("sketch-explain を終了しました");

    Ok(())
}

/// 1行分のコマンドを実行する。終了なら false
async fn run_command(
    orch: &mut CaptureOrchestrator,
    catalog: &dyn ConceptCatalog,
    line: &str,
) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };
    let rest: Vec<&str> = parts.collect();

    match command {
        "concepts" => {
            let concepts = catalog.concepts().await?;
            orch.set_concepts(concepts);
            for concept in orch.concepts() {
                println!("  {}: {}", concept.id, concept.title);
                if !concept.description.is_empty() {
                    println!("      {}", concept.description);
                }
            }
        }
        "select" => {
            let id = rest.first().context("select <id>")?;
            orch.select_concept(id)?;
        }
        "start" => {
            orch.start()?;
            println!("説明してください（done で送信、cancel で取り消し）");
        }
        "stroke" => {
            let coords = rest
                .iter()
                .map(|v| v.parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .context("座標は数値で指定してください")?;
            if coords.len() < 2 || coords.len() % 2 != 0 {
                anyhow::bail!("stroke x y [x y ...]");
            }
            let mut points = coords.chunks(2).map(|p| Point::new(p[0], p[1]));
            if let Some(first) = points.next() {
                if !orch.pointer(PointerEvent::Down(first)) {
                    println!("キャンバスはロックされています");
                    return Ok(true);
                }
            }
            for point in points {
                orch.pointer(PointerEvent::Move(point));
            }
            orch.pointer(PointerEvent::Up);
        }
        "pen" => orch.set_tool(Tool::Pen),
        "eraser" => orch.set_tool(Tool::Eraser),
        "clear" => {
            if !orch.clear_canvas() {
                println!("キャンバスはロックされています");
            }
        }
        "resize" => {
            let (w, h) = match rest.as_slice() {
                [w, h] => (w.parse::<u32>()?, h.parse::<u32>()?),
                _ => anyhow::bail!("resize <w> <h>"),
            };
            orch.resize(w, h);
        }
        "done" => match orch.done()? {
            DoneOutcome::Submitted => println!("考え中..."),
            DoneOutcome::Fallback => print_feedback(orch),
            DoneOutcome::AlreadyInFlight => println!("送信中です"),
        },
        "cancel" => orch.cancel()?,
        "continue" => orch.continue_same()?,
        "next" => orch.next_concept()?,
        "status" => println!("{}", serde_json::to_string_pretty(&orch.status())?),
        "help" => println!("{}", HELP),
        "quit" | "exit" => return Ok(false),
        other => println!("不明なコマンド: {}", other),
    }

    Ok(true)
}

fn print_feedback(orch: &CaptureOrchestrator) {
    if let Some(text) = orch.feedback_text() {
        println!("おばあちゃん: {}", text);
    }
    if let Some(mood) = orch.mood() {
        println!("表情: {} (スコア {:?})", mood.image_name(), orch.score());
    }
    if orch.is_celebrating() {
        println!("🎉 よくできました！");
    }
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<CaptureError>() {
        Some(capture_err) if capture_err.is_user_visible() => println!("{}", capture_err),
        Some(capture_err) => log::warn!("{}", capture_err),
        None => println!("{:#}", err),
    }
}
