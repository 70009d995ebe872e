use std::fmt::Write;

use crate::handlers::app_state::{AppController, AppState};
use crate::models::{ChatMessage, ChatRole, NutritionAnalysis};

const BAR_WIDTH: usize = 20;

pub const DISCLAIMER: &str = "估算结果仅供参考。";

pub fn render_header() -> String {
    "🌿 NutriScan AI · 由 Gemini 2.5 提供支持".to_string()
}

pub fn render_idle() -> String {
    "📷 拍摄您的美餐\n\
     拍照或上传图片，即可立即获取卡路里和营养成分分析。\n\
     输入 /image <图片路径> 上传照片"
        .to_string()
}

pub fn render_loading() -> String {
    "⏳ 正在分析卡路里...".to_string()
}

/// Calories as displayed: whole kcal.
pub fn format_calories(calories: f64) -> String {
    format!("{:.0}", calories)
}

pub fn render_analysis(analysis: &NutritionAnalysis) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "🔥 总热量: {} 千卡 (kcal)", format_calories(analysis.total_calories));

    if let Some(macros) = &analysis.macro_estimate {
        let _ = writeln!(
            out,
            "   蛋白质 {} | 碳水化合物 {} | 脂肪 {}",
            macros.protein, macros.carbs, macros.fat
        );
    }

    let _ = writeln!(out, "\n热量明细");
    for (item, share) in analysis.breakdown() {
        let filled = ((share * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
        let _ = writeln!(
            out,
            "  {} {:>5} kcal  {}{} {:>3.0}%",
            item.name,
            format_calories(item.calories),
            "█".repeat(filled),
            "░".repeat(BAR_WIDTH - filled),
            share * 100.0
        );
    }

    let _ = writeln!(out, "\nℹ️  {}", analysis.summary);
    let _ = write!(out, "\n{}", DISCLAIMER);
    out
}

pub fn render_error(message: &str) -> String {
    format!("⚠️ 分析失败\n{}\n输入 /retry 重试", message)
}

pub fn render_message(message: &ChatMessage) -> String {
    let icon = match message.role {
        ChatRole::User => "🧑",
        ChatRole::Model => "🤖",
    };
    format!("{} {}", icon, message.text)
}

pub fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::from("✨ 营养小助手");
    for message in messages {
        out.push('\n');
        out.push_str(&render_message(message));
    }
    out
}

/// Full view of the current state, chat transcript included when available.
pub fn render_state(app: &AppController) -> String {
    let mut out = match app.state() {
        AppState::Idle => render_idle(),
        AppState::Analyzing { .. } => render_loading(),
        AppState::Result { analysis, .. } => render_analysis(analysis),
        AppState::Error { message, .. } => render_error(message),
    };

    if let Some(chat) = app.chat() {
        out.push_str("\n\n");
        out.push_str(&render_transcript(chat.transcript()));
    }
    out
}
