use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;

use crate::error::BotError;
use crate::events::EngineEvent;
use crate::execution::{AccountSummary, UnrealizedPnl};
use crate::models::Side;
use crate::reporting::{ReportHandle, ReportKind, ReportResponse};
use crate::strategy::{Cross, OscillatorSignal, Trend};

type HandlerError = Box<dyn std::error::Error + Send + Sync>;
type HandlerResult = Result<(), HandlerError>;

/// Report commands accepted from the configured chat
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "SignalBot reports:")]
pub enum Command {
    #[command(description = "balances, net PNL, wins and losses")]
    Summary,
    #[command(description = "realized net PNL")]
    Pnl,
    #[command(description = "open positions with their unrealized PNL")]
    Positions,
    #[command(description = "aggregate unrealized PNL")]
    Unrealized,
    #[command(description = "show this list")]
    Help,
}

impl Command {
    pub fn report_kind(&self) -> Option<ReportKind> {
        match self {
            Command::Summary => Some(ReportKind::AccountSummary),
            Command::Pnl => Some(ReportKind::NetPnl),
            Command::Positions => Some(ReportKind::OpenPositions),
            Command::Unrealized => Some(ReportKind::UnrealizedPnl),
            Command::Help => None,
        }
    }
}

/// Bot handle bound to one chat
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramClient {
    pub fn new(token: String, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
        }
    }

    /// Send a Markdown message to the configured chat
    pub async fn send_message(&self, text: &str) -> Result<(), BotError> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Markdown)
            .await?;
        Ok(())
    }
}

/// Injected into every command handler
#[derive(Clone)]
struct CommandDeps {
    reports: ReportHandle,
    chat_id: ChatId,
}

fn side_emoji(side: Side) -> &'static str {
    match side {
        Side::Buy => "⬆️🚀",
        Side::Sell => "⬇️💣",
    }
}

fn cross_emoji(cross: Cross) -> &'static str {
    match cross {
        Cross::Bullish => "🐗",
        Cross::Bearish => "🐻",
        Cross::Neutral => "",
    }
}

fn trend_emoji(trend: Trend) -> &'static str {
    match trend {
        Trend::StrongBullish => "🐗🐗",
        Trend::Bullish => "🐗",
        Trend::Bearish => "🐻",
        Trend::StrongBearish => "🐻🐻",
        Trend::Neutral => "",
    }
}

fn oscillator_emoji(signal: OscillatorSignal) -> &'static str {
    match signal {
        OscillatorSignal::Overbought => "📈",
        OscillatorSignal::OverboughtX2 => "📈📈",
        OscillatorSignal::OverboughtX3 => "📈📈📈",
        OscillatorSignal::OversoldX2 => "📉📉",
        OscillatorSignal::OversoldX3 => "📉📉📉",
        OscillatorSignal::Neutral => "",
    }
}

fn format_summary(summary: &AccountSummary) -> String {
    format!(
        "    💰 Total: *{:.2}* (initial {:.2})\n\
         \x20   🔒 Allocated: {:.2} | 🆓 Available: {:.2}\n\
         \x20   📊 Net PNL: *{:+.2}* ({:+.2}%)\n\
         \x20   ✅ Wins: {} | ❌ Losses: {} | 📂 Open: {}",
        summary.total_balance,
        summary.initial_balance,
        summary.allocated_balance,
        summary.available_balance,
        summary.net_pnl,
        summary.pnl_pct,
        summary.wins,
        summary.losses,
        summary.open_positions,
    )
}

fn format_unrealized(unrealized: &UnrealizedPnl) -> String {
    format!(
        "    ⏳ Unrealized PNL: *{:+.2}* ({:+.2}%)",
        unrealized.net_pnl, unrealized.pnl_pct
    )
}

/// Render an engine event as a Telegram message
pub fn format_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::SessionStarted {
            interval,
            symbols,
            initial_balance,
            live,
        } => format!(
            "🔔🔔 *NEW SESSION STARTED* 🔔🔔\n\n\
             \x20   ⏱ interval: >>>*{}*<<<\n\
             \x20   🪙 symbols: >>>*{}*<<<\n\
             \x20   💰 balance: {:.2} ({})",
            interval,
            symbols,
            initial_balance,
            if *live { "live" } else { "simulated" }
        ),
        EngineEvent::AlertTriggered { alert, price } => format!(
            "🚨 *{}* {} {} | price: {}",
            alert.symbol, alert.condition, alert.price, price
        ),
        EngineEvent::SignalDetected { analysis } => {
            let mut text = format!("⚡️ {}", analysis.symbol);
            if analysis.cross != Cross::Neutral {
                text += &format!(
                    " | _{} EMA cross_ {}",
                    analysis.cross,
                    cross_emoji(analysis.cross)
                );
            }
            if analysis.oscillator != OscillatorSignal::Neutral {
                text += &format!(
                    " | _RSI {}_ {}",
                    analysis.oscillator,
                    oscillator_emoji(analysis.oscillator)
                );
            }
            let side = analysis
                .side
                .side()
                .map(side_emoji)
                .unwrap_or_default();
            text += &format!(
                "\n    — Trend: _{}_ {}\n    — RSI: {:.2}\n\n    🔮 Side: *{}* {}",
                analysis.trend,
                trend_emoji(analysis.trend),
                analysis.rsi,
                analysis.side,
                side
            );
            text
        }
        EngineEvent::PositionOpened { position } => format!(
            "📥 *OPENED* {} {} {}\n\
             \x20   — Entry: {} ({})\n\
             \x20   — Size: {:.2}\n\
             \x20   — SL: {} | TP: {}",
            position.side,
            position.symbol,
            side_emoji(position.side),
            position.entry_price,
            position.entry_signal,
            position.size,
            position.stop_loss,
            position.take_profit,
        ),
        EngineEvent::PositionClosed { position, summary } => {
            let exit_price = position.exit_price.unwrap_or_default();
            let reason = position
                .exit_reason
                .map(|r| r.to_string())
                .unwrap_or_default();
            let mark = if position.net_pnl >= 0.0 { "✅" } else { "❌" };
            format!(
                "📤 *CLOSED* {} {} [{}] {}\n\
                 \x20   — Entry: {} | Exit: {}\n\
                 \x20   — PNL: *{:+.2}* ({:+.2}%)\n\n{}",
                position.side,
                position.symbol,
                reason,
                mark,
                position.entry_price,
                exit_price,
                position.net_pnl,
                position.pnl_pct,
                format_summary(summary)
            )
        }
        EngineEvent::OrderFailed { description, error } => {
            format!("⛔️ *ORDER FAILED* {}\n    {}", description, error)
        }
        EngineEvent::SessionEnded {
            summary,
            unrealized,
        } => format!(
            "🏁 *SESSION ENDED*\n\n{}\n{}",
            format_summary(summary),
            format_unrealized(unrealized)
        ),
    }
}

/// Render a report response as a Telegram message
pub fn format_report(response: &ReportResponse) -> String {
    match response {
        ReportResponse::AccountSummary(summary) => {
            format!("📒 *ACCOUNT*\n\n{}", format_summary(summary))
        }
        ReportResponse::NetPnl { net_pnl, pnl_pct } => {
            format!("📊 Net PNL: *{:+.2}* ({:+.2}%)", net_pnl, pnl_pct)
        }
        ReportResponse::OpenPositions(positions) if positions.is_empty() => {
            "📂 No open positions".to_string()
        }
        ReportResponse::OpenPositions(positions) => {
            let lines: Vec<String> = positions
                .iter()
                .map(|p| {
                    format!(
                        "    {} {} @ {} → {} | *{:+.2}* ({:+.2}%)",
                        p.side, p.symbol, p.entry_price, p.current_price, p.net_pnl, p.pnl_pct
                    )
                })
                .collect();
            format!("📂 *OPEN POSITIONS*\n\n{}", lines.join("\n"))
        }
        ReportResponse::UnrealizedPnl(unrealized) => format_unrealized(unrealized),
    }
}

/// Drain engine events into the chat; send failures are logged and dropped
pub async fn run_notifier(telegram: TelegramClient, mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        let text = format_event(&event);
        if let Err(e) = telegram.send_message(&text).await {
            tracing::warn!(event = event.name(), error = %e, "Failed to send Telegram message");
        }
    }

    tracing::info!("Telegram notifier stopped");
}

/// Answer report commands (`/summary`, `/pnl`, `/positions`, `/unrealized`)
/// from the configured chat, long-polling until the task is aborted
pub async fn run_command_listener(telegram: TelegramClient, reports: ReportHandle) {
    let deps = Arc::new(CommandDeps {
        reports,
        chat_id: telegram.chat_id,
    });

    tracing::info!("💬 Telegram command listener starting (long-polling)");

    Dispatcher::builder(telegram.bot, schema())
        .dependencies(dptree::deps![deps])
        .default_handler(|_| async {})
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message, deps: Arc<CommandDeps>| msg.chat.id == deps.chat_id)
        .branch(teloxide::filter_command::<Command, _>().endpoint(handle_command))
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    deps: Arc<CommandDeps>,
) -> HandlerResult {
    let Some(kind) = cmd.report_kind() else {
        bot.send_message(msg.chat.id, Command::descriptions().to_string())
            .await?;
        return Ok(());
    };

    let text = match deps.reports.query(kind).await {
        Ok(response) => format_report(&response),
        Err(e) => {
            tracing::info!(command = %kind, error = %e, "Dispatcher gone, report unavailable");
            "⚠️ Session is shutting down, no reports available".to_string()
        }
    };

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Account;
    use crate::models::Interval;

    #[test]
    fn test_commands_map_to_reports() {
        let parse = |text: &str| Command::parse(text, "signal_bot").ok();

        assert_eq!(parse("/summary"), Some(Command::Summary));
        assert_eq!(parse("/pnl"), Some(Command::Pnl));
        assert_eq!(parse("/positions@signal_bot"), Some(Command::Positions));
        assert_eq!(parse("/start"), None);

        assert_eq!(
            Command::Summary.report_kind(),
            Some(ReportKind::AccountSummary)
        );
        assert_eq!(Command::Pnl.report_kind(), Some(ReportKind::NetPnl));
        assert_eq!(
            Command::Positions.report_kind(),
            Some(ReportKind::OpenPositions)
        );
        assert_eq!(
            Command::Unrealized.report_kind(),
            Some(ReportKind::UnrealizedPnl)
        );
        assert_eq!(Command::Help.report_kind(), None);
    }

    #[test]
    fn test_command_names_match_report_kinds() {
        let help = Command::descriptions().to_string();
        for kind in [
            ReportKind::AccountSummary,
            ReportKind::NetPnl,
            ReportKind::OpenPositions,
            ReportKind::UnrealizedPnl,
        ] {
            assert!(help.contains(&format!("/{}", kind.command())), "{}", help);
        }
    }

    #[test]
    fn test_format_session_started() {
        let text = format_event(&EngineEvent::SessionStarted {
            interval: Interval::H4,
            symbols: 180,
            initial_balance: 1000.0,
            live: false,
        });
        assert!(text.contains("NEW SESSION STARTED"));
        assert!(text.contains("*4h*"));
        assert!(text.contains("*180*"));
    }

    #[test]
    fn test_format_reports() {
        let summary = Account::new(1000.0).summary();
        assert!(format_report(&ReportResponse::AccountSummary(summary)).contains("1000.00"));
        assert_eq!(
            format_report(&ReportResponse::OpenPositions(vec![])),
            "📂 No open positions"
        );
        assert!(format_report(&ReportResponse::NetPnl {
            net_pnl: 20.0,
            pnl_pct: 2.0
        })
        .contains("+20.00"));
    }
}
