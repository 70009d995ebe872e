use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::handlers::app_state::AppController;
use crate::handlers::chat::{TurnOutcome, APOLOGY};
use crate::handlers::render;
use crate::services::image;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Image(PathBuf),
    Retry,
    Show,
    Help,
    Quit,
    Chat(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }

    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };

    match head {
        "/image" | "/photo" if !rest.is_empty() => Command::Image(PathBuf::from(rest)),
        "/image" | "/photo" | "/help" => Command::Help,
        "/retry" => Command::Retry,
        "/show" => Command::Show,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Chat(trimmed.to_string()),
    }
}

fn help_text() -> &'static str {
    "命令:\n  \
     /image <路径>  上传餐点照片并分析\n  \
     /retry         分析失败后重试\n  \
     /show          显示当前结果和对话\n  \
     /quit          退出\n\
     其他输入将作为问题发送给营养小助手。"
}

/// Interactive terminal front end: one line per command, views printed
/// after every transition.
pub async fn run(app: &mut AppController) -> Result<()> {
    println!("{}\n", render::render_header());
    println!("{}\n", render::render_idle());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Help => println!("{}", help_text()),
            Command::Quit => break,
            Command::Show => println!("{}", render::render_state(app)),
            Command::Retry => {
                if app.retry() {
                    println!("{}", render::render_idle());
                } else {
                    println!("当前没有需要重试的分析。");
                }
            }
            Command::Image(path) => {
                let payload = match image::load_image(&path).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::warn!("⚠️ Could not load image {}: {:#}", path.display(), e);
                        println!("无法读取图片: {}", path.display());
                        continue;
                    }
                };

                println!("{}", render::render_loading());
                app.analyze(payload).await;
                println!("{}", render::render_state(app));
            }
            Command::Chat(text) => {
                if !app.chat_available() {
                    println!("请先上传餐点照片 (/image <路径>)。");
                    continue;
                }

                print!("🤖 ");
                std::io::stdout().flush()?;

                let result = app
                    .send_chat(&text, |fragment| {
                        print!("{}", fragment);
                        let _ = std::io::stdout().flush();
                    })
                    .await;

                match result {
                    Ok(TurnOutcome::Replied) => println!(),
                    Ok(TurnOutcome::Failed) => println!("\n🤖 {}", APOLOGY),
                    Err(e) => println!("\n{}", e),
                }
            }
        }
    }

    log::info!("🛑 Console session ended");
    Ok(())
}
