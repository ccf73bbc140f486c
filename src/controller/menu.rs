//! Menu rendering - HTML text and inline keyboards

use crate::router::TokenInfo;
use crate::store::types::{TokenHolding, WalletRecord};
use crate::transport::{Button, Keyboard};

/// Shorten a base58 address for display
pub fn short_addr(addr: &str) -> String {
    if addr.len() <= 12 {
        addr.to_string()
    } else {
        format!("{}...{}", &addr[..4], &addr[addr.len() - 4..])
    }
}

pub fn main_menu_text(record: &WalletRecord) -> String {
    let mut text = format!(
        "<b>Wallet</b>\n<code>{}</code>\nBalance: <b>{:.4} SOL</b>\n",
        record.pubkey, record.balance
    );

    if record.tokens.is_empty() {
        text.push_str("\nNo tokens held.\n");
    } else {
        text.push_str("\n<b>Tokens</b>\n");
        for token in &record.tokens {
            text.push_str(&format!("{}: {}\n", short_addr(&token.mint), token.balance));
        }
    }

    let withdraw_to = if record.withdraw_to.is_empty() {
        "not set".to_string()
    } else {
        short_addr(&record.withdraw_to)
    };
    text.push_str(&format!(
        "\nPriority: {} | Slippage: {}% buy / {}% sell\nWithdraw to: {}",
        record.priority_level, record.buy_slip, record.sell_slip, withdraw_to
    ));
    text
}

pub fn main_menu_keyboard() -> Keyboard {
    Keyboard::new(vec![
        vec![
            Button::new("Buy", "menu_buy"),
            Button::new("Sell", "menu_sell"),
        ],
        vec![
            Button::new("Tokens", "menu_list_tokens"),
            Button::new("Withdraw", "menu_withdraw"),
        ],
        vec![
            Button::new("Settings", "menu_settings"),
            Button::new("Refresh", "menu_refresh"),
        ],
    ])
}

pub fn settings_text(record: &WalletRecord) -> String {
    let withdraw_to = if record.withdraw_to.is_empty() {
        "not set".to_string()
    } else {
        short_addr(&record.withdraw_to)
    };
    format!(
        "<b>Settings</b>\nPriority level: {}\nBuy slippage: {}%\nSell slippage: {}%\nWithdrawal address: {}",
        record.priority_level, record.buy_slip, record.sell_slip, withdraw_to
    )
}

pub fn settings_keyboard() -> Keyboard {
    Keyboard::new(vec![
        vec![Button::new("Priority level", "set_priority_level")],
        vec![
            Button::new("Buy slippage", "set_buy_slip"),
            Button::new("Sell slippage", "set_sell_slip"),
        ],
        vec![Button::new("Withdrawal address", "set_withdrawal_address")],
    ])
}

pub fn priority_keyboard() -> Keyboard {
    Keyboard::new(vec![
        vec![
            Button::new("Low", "set_priority_low"),
            Button::new("Medium", "set_priority_medium"),
        ],
        vec![
            Button::new("High", "set_priority_high"),
            Button::new("Turbo", "set_priority_turbo"),
        ],
    ])
}

pub fn withdraw_keyboard() -> Keyboard {
    Keyboard::new(vec![vec![
        Button::new("SOL", "withdraw_sol"),
        Button::new("Tokens", "withdraw_tokens"),
    ]])
}

/// One row of the token listing view
pub fn token_line(token: &TokenHolding, info: &TokenInfo, price: Option<f64>) -> String {
    let mut line = format!(
        "<b>{}</b> ({})\n  <code>{}</code>\n  Held: {}",
        info.name, info.symbol, token.mint, token.balance
    );
    if let Some(price) = price {
        line.push_str(&format!(" | Price: {:.9} SOL", price));
    }
    line.push('\n');
    line
}
