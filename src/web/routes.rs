use axum::{
    extract::{Query, State},
    response::{Html, Json, Redirect},
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::ott::looks_like_login_token;
use crate::auth::session::SESSION_COOKIE;
use crate::auth::{load_credential, store_credential};
use crate::db::UserRepo;
use crate::error::{AppError, AppResult};
use crate::wb::{Balance, PingReport, SellerInfo};
use crate::web::state::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Resolve the signed session cookie to a Telegram id.
fn session_user(state: &AppState, jar: &CookieJar) -> AppResult<i64> {
    let cookie = jar
        .get(SESSION_COOKIE)
        .ok_or(AppError::SessionInvalidOrExpired)?;
    state.sessions.verify(cookie.value())
}

/// Guests land on whoami, authenticated users on the dashboard.
pub async fn index(State(state): State<AppState>, jar: CookieJar) -> Redirect {
    match session_user(&state, &jar) {
        Ok(_) => Redirect::to("/dashboard"),
        Err(_) => Redirect::to("/auth/whoami"),
    }
}

#[derive(Deserialize)]
pub struct LoginParams {
    token: String,
}

/// One-time-token login: the link the bot hands out points here.
pub async fn login_tg(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    if !looks_like_login_token(&params.token) {
        return Err(AppError::TokenExpiredOrInvalid);
    }

    let tg_id = state.tokens.redeem(&params.token).await?;
    UserRepo::ensure(&state.pool, tg_id).await?;
    info!(tg_id, "login token redeemed");

    let session = state.sessions.bind(tg_id);
    let cookie = Cookie::build((SESSION_COOKIE, session))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((jar.add(cookie), Redirect::to("/dashboard")))
}

/// Session info for the current visitor
#[derive(Serialize)]
pub struct WhoamiResponse {
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tg_id: Option<i64>,
}

pub async fn whoami(State(state): State<AppState>, jar: CookieJar) -> Json<WhoamiResponse> {
    match session_user(&state, &jar) {
        Ok(tg_id) => Json(WhoamiResponse {
            authorized: true,
            tg_id: Some(tg_id),
        }),
        Err(_) => Json(WhoamiResponse {
            authorized: false,
            tg_id: None,
        }),
    }
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Redirect) {
    let removal = Cookie::build(SESSION_COOKIE).path("/").build();
    (jar.remove(removal), Redirect::to("/"))
}

/// Seller dashboard: profile and balance, or a prompt to save the API key.
pub async fn dashboard(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, AppError> {
    let tg_id = session_user(&state, &jar)?;

    let mut errors: Vec<String> = Vec::new();
    let mut seller: Option<SellerInfo> = None;
    let mut balance: Option<Balance> = None;

    let token = match load_credential(&state.pool, &state.cipher, tg_id).await {
        Ok(token) => token,
        Err(AppError::DecryptionAuthFailure) => {
            errors.push(
                "Не удалось расшифровать API-ключ. Сохраните его заново в настройках.".to_string(),
            );
            None
        }
        Err(e) => return Err(e),
    };
    let needs_key = token.is_none();

    if let Some(token) = token {
        match state.wb.seller_info(&token).await {
            Ok(info) => seller = Some(info),
            Err(e) => errors.push(format!("WB seller-info: {e}")),
        }
        match state.wb.account_balance_cached(&token).await {
            Ok(b) => balance = Some(b),
            Err(e) => errors.push(format!("WB balance: {e}")),
        }
    }

    Ok(Html(render_dashboard(
        tg_id,
        seller.as_ref(),
        balance.as_ref(),
        needs_key,
        &errors.join(" | "),
    )))
}

#[derive(Deserialize)]
pub struct SettingsForm {
    #[serde(default)]
    pub wb_api_key: String,
}

pub async fn settings_get(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, AppError> {
    let tg_id = session_user(&state, &jar)?;

    let has_key = match load_credential(&state.pool, &state.cipher, tg_id).await {
        Ok(stored) => stored.is_some(),
        // A row exists but no longer decrypts; the form still applies.
        Err(AppError::DecryptionAuthFailure) => true,
        Err(e) => return Err(e),
    };

    Ok(Html(render_settings(tg_id, has_key, false, "")))
}

pub async fn settings_post(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<SettingsForm>,
) -> Result<Html<String>, AppError> {
    let tg_id = session_user(&state, &jar)?;

    let raw = form.wb_api_key.trim();
    if raw.is_empty() {
        return Ok(Html(render_settings(
            tg_id,
            false,
            false,
            "Укажите API ключ.",
        )));
    }

    match store_credential(&state.pool, &state.cipher, tg_id, raw).await {
        Ok(()) => Ok(Html(render_settings(tg_id, true, true, ""))),
        Err(AppError::CredentialMalformed) => Ok(Html(render_settings(
            tg_id,
            false,
            false,
            "Ключ не похож на JWT-токен WB. Проверьте, что скопировали его целиком.",
        ))),
        Err(e) => Err(e),
    }
}

/// Live probe of the stored key against both WB endpoints.
pub async fn check_token(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, AppError> {
    let tg_id = session_user(&state, &jar)?;

    let report = match load_credential(&state.pool, &state.cipher, tg_id).await {
        Ok(Some(token)) => Some(state.wb.ping_token(&token).await),
        Ok(None) => None,
        Err(AppError::DecryptionAuthFailure) => {
            return Ok(Html(render_check_token(
                tg_id,
                None,
                "Не удалось расшифровать API-ключ. Сохраните его заново.",
            )))
        }
        Err(e) => return Err(e),
    };

    match report {
        Some(report) => Ok(Html(render_check_token(tg_id, Some(&report), ""))),
        None => Ok(Html(render_check_token(
            tg_id,
            None,
            "API-ключ WB не найден. Добавьте его в настройках.",
        ))),
    }
}

// ---------------------------------------------------------------------------
// HTML rendering
// ---------------------------------------------------------------------------

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ru">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Kuzka Seller Bot - {title}</title>
    <style>
        :root {{
            --bg-primary: #1b1e23;
            --bg-secondary: #24272e;
            --text-primary: #e6e6e6;
            --text-secondary: #9aa0a8;
            --accent: #7c5cff;
            --success: #3ba55d;
            --danger: #ed4245;
        }}
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{
            font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            min-height: 100vh;
        }}
        header {{
            background: var(--bg-secondary);
            padding: 1rem 1.5rem;
            display: flex;
            justify-content: space-between;
            align-items: center;
        }}
        header h1 {{ font-size: 1.1rem; font-weight: 600; }}
        nav a {{
            color: var(--text-secondary);
            text-decoration: none;
            margin-left: 1rem;
        }}
        nav a:hover {{ color: var(--text-primary); }}
        main {{ max-width: 720px; margin: 0 auto; padding: 1.5rem; }}
        .card {{
            background: var(--bg-secondary);
            border-radius: 8px;
            padding: 1.25rem;
            margin-bottom: 1rem;
        }}
        .card h2 {{ font-size: 1rem; margin-bottom: 0.75rem; }}
        .muted {{ color: var(--text-secondary); font-size: 0.875rem; }}
        .error {{ color: var(--danger); margin-bottom: 1rem; }}
        .ok {{ color: var(--success); }}
        .amount {{ font-size: 1.5rem; font-weight: 600; }}
        input[type=text], input[type=password] {{
            width: 100%;
            padding: 0.6rem;
            border-radius: 6px;
            border: 1px solid #3a3e46;
            background: var(--bg-primary);
            color: var(--text-primary);
            margin-bottom: 0.75rem;
        }}
        button {{
            background: var(--accent);
            color: white;
            border: none;
            border-radius: 6px;
            padding: 0.6rem 1.2rem;
            cursor: pointer;
        }}
        table {{ width: 100%; border-collapse: collapse; }}
        td, th {{ padding: 0.5rem; text-align: left; border-bottom: 1px solid #3a3e46; }}
    </style>
</head>
<body>
    <header>
        <h1>Kuzka Seller Bot</h1>
        <nav>
            <a href="/dashboard">Кабинет</a>
            <a href="/check_token">Проверка токена</a>
            <a href="/settings">Настройки</a>
        </nav>
    </header>
    <main>
{body}
    </main>
</body>
</html>"#
    )
}

fn render_dashboard(
    tg_id: i64,
    seller: Option<&SellerInfo>,
    balance: Option<&Balance>,
    needs_key: bool,
    error: &str,
) -> String {
    let mut body = String::new();

    if !error.is_empty() {
        body.push_str(&format!(
            r#"<div class="error">{}</div>"#,
            escape_html(error)
        ));
    }

    if needs_key {
        body.push_str(
            r#"<div class="card">
    <h2>API-ключ не настроен</h2>
    <p class="muted">Добавьте API-ключ Wildberries на странице <a href="/settings">настроек</a>, чтобы видеть баланс и данные продавца.</p>
</div>"#,
        );
    }

    if let Some(seller) = seller {
        let name = seller.name.as_deref().unwrap_or("—");
        let trade_mark = seller.trade_mark.as_deref().unwrap_or("—");
        let sid = seller.sid.as_deref().unwrap_or("—");
        body.push_str(&format!(
            r#"<div class="card">
    <h2>Продавец</h2>
    <table>
        <tr><td class="muted">Название</td><td>{}</td></tr>
        <tr><td class="muted">Бренд</td><td>{}</td></tr>
        <tr><td class="muted">ID</td><td>{}</td></tr>
    </table>
</div>"#,
            escape_html(name),
            escape_html(trade_mark),
            escape_html(sid),
        ));
    }

    if let Some(balance) = balance {
        body.push_str(&format!(
            r#"<div class="card">
    <h2>Баланс</h2>
    <div class="amount">{:.2} {}</div>
    <p class="muted">Доступно к выводу: {:.2} {}</p>
</div>"#,
            balance.current,
            escape_html(&balance.currency),
            balance.for_withdraw,
            escape_html(&balance.currency),
        ));
    }

    body.push_str(&format!(
        r#"<p class="muted">Telegram ID: {tg_id}</p>
<form method="post" action="/logout"><button type="submit">Выйти</button></form>"#
    ));

    page("Кабинет", &body)
}

fn render_settings(tg_id: i64, has_key: bool, saved: bool, error: &str) -> String {
    let mut body = String::new();

    if !error.is_empty() {
        body.push_str(&format!(
            r#"<div class="error">{}</div>"#,
            escape_html(error)
        ));
    }
    if saved {
        body.push_str(r#"<p class="ok">Ключ сохранён.</p>"#);
    }

    let status = if has_key {
        "Ключ сохранён и зашифрован."
    } else {
        "Ключ ещё не сохранён."
    };

    body.push_str(&format!(
        r#"<div class="card">
    <h2>API-ключ Wildberries</h2>
    <p class="muted">{status}</p>
    <form method="post" action="/settings">
        <input type="password" name="wb_api_key" placeholder="Вставьте API-ключ WB" autocomplete="off">
        <button type="submit">Сохранить</button>
    </form>
</div>
<p class="muted">Telegram ID: {tg_id}</p>"#
    ));

    page("Настройки", &body)
}

fn render_check_token(tg_id: i64, report: Option<&PingReport>, error: &str) -> String {
    let mut body = String::new();

    if !error.is_empty() {
        body.push_str(&format!(
            r#"<div class="error">{}</div>"#,
            escape_html(error)
        ));
    }

    if let Some(report) = report {
        let row = |name: &str, probe: &crate::wb::Probe| {
            let status = if probe.ok {
                r#"<span class="ok">ok</span>"#.to_string()
            } else {
                format!(
                    r#"<span class="error">{}</span>"#,
                    escape_html(probe.error.as_deref().unwrap_or("error"))
                )
            };
            format!(
                "<tr><td>{}</td><td>{}</td><td class=\"muted\">{} ms</td></tr>",
                escape_html(name),
                status,
                probe.ms
            )
        };

        body.push_str(&format!(
            r#"<div class="card">
    <h2>Проверка токена</h2>
    <table>
        <tr><th>Эндпоинт</th><th>Статус</th><th>Время</th></tr>
        {}
        {}
    </table>
</div>"#,
            row("seller-info", &report.seller_info),
            row("account-balance", &report.account_balance),
        ));
    }

    body.push_str(&format!(r#"<p class="muted">Telegram ID: {tg_id}</p>"#));
    page("Проверка токена", &body)
}

/// Create the web router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/login/tg", get(login_tg))
        .route("/dashboard", get(dashboard))
        .route("/settings", get(settings_get).post(settings_post))
        .route("/auth/whoami", get(whoami))
        .route("/logout", post(logout))
        .route("/check_token", get(check_token))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
