//! Bot commands and plain-text menu handlers.

use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};
use teloxide::utils::command::BotCommands;
use tracing::warn;

use crate::auth::load_credential;
use crate::bot::BotContext;
use crate::error::AppError;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const BTN_BALANCE: &str = "Баланс";
const BTN_CABINET: &str = "Кабинет";
const BTN_CHECK: &str = "Проверка токена";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "главное меню")]
    Start,
    #[command(description = "ссылка для входа в веб-кабинет")]
    Login,
    #[command(description = "баланс счёта WB")]
    Balance,
    #[command(description = "проверка API-ключа")]
    Check,
}

fn main_menu() -> KeyboardMarkup {
    KeyboardMarkup::new([
        vec![
            KeyboardButton::new(BTN_BALANCE),
            KeyboardButton::new(BTN_CABINET),
        ],
        vec![KeyboardButton::new(BTN_CHECK)],
    ])
    .resize_keyboard(true)
}

fn login_button(text: &str, url: &str) -> Option<InlineKeyboardMarkup> {
    let url = reqwest::Url::parse(url).ok()?;
    Some(InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
        text.to_string(),
        url,
    )]]))
}

fn sender_id(msg: &Message) -> Option<i64> {
    msg.from().map(|user| user.id.0 as i64)
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<BotContext>,
) -> HandlerResult {
    match cmd {
        Command::Start => start(bot, msg).await,
        Command::Login => send_login_link(bot, msg, ctx, "Открыть кабинет").await,
        Command::Balance => balance(bot, msg, ctx).await,
        Command::Check => check_token(bot, msg, ctx).await,
    }
}

pub async fn handle_text(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> HandlerResult {
    match msg.text() {
        Some(BTN_BALANCE) => balance(bot, msg, ctx).await,
        Some(BTN_CABINET) => send_login_link(bot, msg, ctx, "Открыть кабинет").await,
        Some(BTN_CHECK) => check_token(bot, msg, ctx).await,
        _ => Ok(()),
    }
}

async fn start(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "Привет! Я Kuzka Seller Bot.\nВыбирай раздел:",
    )
    .reply_markup(main_menu())
    .await?;
    Ok(())
}

async fn send_login_link(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
    button_text: &str,
) -> HandlerResult {
    let Some(tg_id) = sender_id(&msg) else {
        return Ok(());
    };

    let url = ctx.login_url(tg_id).await;
    let mut request = bot.send_message(
        msg.chat.id,
        "Одноразовая ссылка для входа в веб-кабинет. Действует 10 минут.",
    );
    if let Some(markup) = login_button(button_text, &url) {
        request = request.reply_markup(markup);
    }
    request.await?;
    Ok(())
}

/// Resolve the stored credential or reply with the appropriate prompt.
/// Returns None when a reply was already sent.
async fn require_token(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    tg_id: i64,
) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
    match load_credential(&ctx.app.pool, &ctx.app.cipher, tg_id).await {
        Ok(Some(token)) => Ok(Some(token)),
        Ok(None) => {
            let url = ctx.login_url(tg_id).await;
            let mut request = bot.send_message(
                msg.chat.id,
                "Нужен API-ключ WB. Сохраните его в веб-кабинете.",
            );
            if let Some(markup) = login_button("Сохранить API-ключ", &url) {
                request = request.reply_markup(markup);
            }
            request.await?;
            Ok(None)
        }
        Err(AppError::DecryptionAuthFailure) => {
            let url = ctx.login_url(tg_id).await;
            let mut request = bot.send_message(
                msg.chat.id,
                "Не удалось расшифровать сохранённый API-ключ. Сохраните его заново.",
            );
            if let Some(markup) = login_button("Обновить API-ключ", &url) {
                request = request.reply_markup(markup);
            }
            request.await?;
            Ok(None)
        }
        Err(e) => {
            warn!("credential lookup failed: {e}");
            bot.send_message(msg.chat.id, "Что-то пошло не так. Попробуйте позже.")
                .await?;
            Ok(None)
        }
    }
}

async fn balance(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> HandlerResult {
    let Some(tg_id) = sender_id(&msg) else {
        return Ok(());
    };

    if let Some(wait) = ctx.cooldown.check(tg_id) {
        bot.send_message(
            msg.chat.id,
            format!("Слишком часто. Подождите ещё {wait} с и повторите."),
        )
        .await?;
        return Ok(());
    }

    let Some(token) = require_token(&bot, &msg, &ctx, tg_id).await? else {
        return Ok(());
    };

    match ctx.app.wb.account_balance_cached(&token).await {
        Ok(balance) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "Баланс: {} {}\nДоступно к выводу: {} {}",
                    fmt_money(balance.current),
                    balance.currency,
                    fmt_money(balance.for_withdraw),
                    balance.currency,
                ),
            )
            .reply_markup(main_menu())
            .await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, format!("Ошибка WB: {e}"))
                .await?;
        }
    }
    Ok(())
}

async fn check_token(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> HandlerResult {
    let Some(tg_id) = sender_id(&msg) else {
        return Ok(());
    };

    if let Some(wait) = ctx.cooldown.check(tg_id) {
        bot.send_message(
            msg.chat.id,
            format!("Слишком часто. Подождите ещё {wait} с и повторите."),
        )
        .await?;
        return Ok(());
    }

    let Some(token) = require_token(&bot, &msg, &ctx, tg_id).await? else {
        return Ok(());
    };

    let report = ctx.app.wb.ping_token(&token).await;
    let line = |name: &str, probe: &crate::wb::Probe| match &probe.error {
        None => format!("{name}: ok ({} ms)", probe.ms),
        Some(err) => format!("{name}: ошибка — {err}"),
    };

    bot.send_message(
        msg.chat.id,
        format!(
            "Проверка токена:\n{}\n{}",
            line("seller-info", &report.seller_info),
            line("account-balance", &report.account_balance),
        ),
    )
    .reply_markup(main_menu())
    .await?;
    Ok(())
}

/// "49 985.47" style money formatting
fn fmt_money(x: f64) -> String {
    let formatted = format!("{x:.2}");
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}.{frac_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_money_grouping() {
        assert_eq!(fmt_money(0.0), "0.00");
        assert_eq!(fmt_money(999.5), "999.50");
        assert_eq!(fmt_money(49985.47), "49 985.47");
        assert_eq!(fmt_money(1234567.89), "1 234 567.89");
        assert_eq!(fmt_money(-1234.5), "-1 234.50");
    }

    #[test]
    fn test_login_button_rejects_bad_url() {
        assert!(login_button("x", "not a url").is_none());
        assert!(login_button("x", "https://bot.example.com/login/tg?token=abc").is_some());
    }

    #[test]
    fn test_command_parsing() {
        use teloxide::utils::command::BotCommands;
        assert!(Command::parse("/start", "kuzka_bot").is_ok());
        assert!(Command::parse("/balance", "kuzka_bot").is_ok());
        assert!(Command::parse("/nosuch", "kuzka_bot").is_err());
    }
}
