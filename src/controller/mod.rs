//! Conversation controller - inbound event dispatch
//!
//! One inbound event (message or button press) runs end to end under
//! the uid's session lock: admission check, awaiting-slot consumption,
//! handler, menu refresh. A user therefore never races themselves,
//! while different users are handled in parallel.
//!
//! Every handler error is caught at the dispatch boundary. Actionable
//! errors are shown verbatim; anything else becomes the generic support
//! message, and the pending slot is cleared either way.

pub mod menu;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::grinder;
use crate::guard::{AdmissionGuard, Verdict};
use crate::orchestrator::{FailureDiag, SwapOrchestrator, TradeOutcome};
use crate::router::Router;
use crate::session::{AwaitingAction, SessionRegistry, UserSession};
use crate::store::types::PriorityLevel;
use crate::store::{SlipSide, WalletStore};
use crate::transport::{telegram::InboundEvent, ChatTransport, Keyboard};

const SUPPORT_MESSAGE: &str =
    "Something went wrong on our side. Please try again in a moment or contact support.";

const ACCESS_MESSAGE: &str =
    "Access is limited to group members. Join the group, then tap Retry.";

pub struct ConversationController {
    transport: Arc<dyn ChatTransport>,
    store: Arc<WalletStore>,
    orchestrator: Arc<SwapOrchestrator>,
    router: Arc<dyn Router>,
    guard: Arc<AdmissionGuard>,
    registry: Arc<SessionRegistry>,
    banner_path: String,
}

impl ConversationController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<WalletStore>,
        orchestrator: Arc<SwapOrchestrator>,
        router: Arc<dyn Router>,
        guard: Arc<AdmissionGuard>,
        registry: Arc<SessionRegistry>,
        banner_path: String,
    ) -> Self {
        Self {
            transport,
            store,
            orchestrator,
            router,
            guard,
            registry,
            banner_path,
        }
    }

    /// Handle one inbound event to completion. Never fails; errors end
    /// as a chat message and a log line.
    pub async fn handle_event(&self, event: InboundEvent) {
        let uid = match &event {
            InboundEvent::Message { uid, .. } => *uid,
            InboundEvent::Callback { uid, .. } => *uid,
        };

        let session = self.registry.session(uid);
        let mut session = session.lock().await;

        match self.guard.check(uid, &mut session, Instant::now()).await {
            Verdict::GroupChat => return,
            Verdict::RateLimit => {
                let _ = self
                    .transport
                    .send_message(uid, "Too many requests. Give it a few seconds.", None)
                    .await;
                return;
            }
            Verdict::NotMember => {
                self.handle_not_member(uid, &event).await;
                return;
            }
            Verdict::Allowed => {}
        }

        if let Err(e) = self.dispatch(uid, &mut session, &event).await {
            session.awaiting = None;
            let text = if e.is_user_facing() {
                e.to_string()
            } else {
                warn!("Handler failed for {}: {}", uid, e);
                SUPPORT_MESSAGE.to_string()
            };
            let _ = self.transport.send_message(uid, &text, None).await;
        }
    }

    async fn handle_not_member(&self, uid: i64, event: &InboundEvent) {
        let keyboard = Keyboard::single("Retry", "retry_access");

        if let InboundEvent::Callback {
            callback_id,
            message_id,
            data,
            ..
        } = event
        {
            if data == "retry_access" {
                let _ = self.transport.answer_callback(callback_id).await;
                if self.guard.recheck_membership(uid).await {
                    let _ = self
                        .transport
                        .send_message(uid, "Access granted. Send /start to begin.", None)
                        .await;
                } else {
                    // Repeated retries refresh the pressed prompt in
                    // place; they never stack new ones.
                    let _ = self
                        .transport
                        .edit_message(uid, *message_id, ACCESS_MESSAGE, Some(keyboard))
                        .await;
                }
                return;
            }
        }
        let _ = self
            .transport
            .send_message(uid, ACCESS_MESSAGE, Some(keyboard))
            .await;
    }

    async fn dispatch(
        &self,
        uid: i64,
        session: &mut UserSession,
        event: &InboundEvent,
    ) -> Result<()> {
        match event {
            InboundEvent::Message { username, text, .. } => {
                let text = text.trim();
                // An armed prompt swallows any inbound text, commands
                // included; the slot is consumed exactly once.
                if let Some(action) = session.consume_awaiting() {
                    self.handle_awaiting(uid, session, action, text).await
                } else if text.starts_with("/start") {
                    self.handle_start(uid, session, username).await
                } else if text.starts_with("/menu") {
                    self.render_menu(uid, session).await
                } else if text.starts_with("/help") {
                    self.transport
                        .send_message(uid, help_text(), None)
                        .await
                        .map(|_| ())
                } else {
                    debug!("No pending prompt for {}, ignoring free text", uid);
                    Ok(())
                }
            }
            InboundEvent::Callback {
                callback_id,
                message_id,
                data,
                ..
            } => {
                if let Err(e) = self.transport.answer_callback(callback_id).await {
                    debug!("Callback ack failed: {}", e);
                }
                // Button presses anchor the in-place menu edit target
                session.menu_msg = Some(*message_id);
                self.handle_callback(uid, session, data).await
            }
        }
    }

    /// First contact: cache identity, create the wallet at most once,
    /// render the menu
    async fn handle_start(
        &self,
        uid: i64,
        session: &mut UserSession,
        username: &str,
    ) -> Result<()> {
        if self.store.get_identity(uid).await?.is_none() {
            self.store.cache_identity(uid, username).await?;
        }

        match self.store.get(uid).await? {
            Some(record) => {
                self.transport
                    .send_message(
                        uid,
                        &format!(
                            "You already have a wallet:\n<code>{}</code>",
                            record.pubkey
                        ),
                        None,
                    )
                    .await?;
            }
            None => {
                let (pubkey, privkey) = grinder::grind();
                self.store.create(uid, pubkey.clone(), privkey).await?;
                info!("New wallet for uid {}", uid);
                self.transport
                    .send_message(
                        uid,
                        &format!(
                            "Wallet created. Fund this address to start trading:\n<code>{}</code>",
                            pubkey
                        ),
                        None,
                    )
                    .await?;
            }
        }

        let _ = self
            .transport
            .send_photo(uid, &self.banner_path, "Welcome to the trading desk")
            .await;
        session.menu_msg = None;
        self.render_menu(uid, session).await
    }

    async fn handle_callback(
        &self,
        uid: i64,
        session: &mut UserSession,
        data: &str,
    ) -> Result<()> {
        match data {
            "menu_buy" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::Buy,
                    "Send the trade as: <code>&lt;mint&gt; &lt;SOL amount&gt;</code>",
                )
                .await
            }
            "menu_sell" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::Sell,
                    "Send the trade as: <code>&lt;mint&gt; &lt;percent to sell&gt;</code>",
                )
                .await
            }
            "menu_burn_tokens" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::BurnTokens,
                    "Send the mint to burn, optionally followed by an amount. \
                     Omit the amount (or send 0) to burn everything and close the account.",
                )
                .await
            }
            "menu_list_tokens" => self.render_token_list(uid, session).await,
            "menu_settings" => {
                let record = self
                    .store
                    .get(uid)
                    .await?
                    .ok_or(Error::WalletMissing(uid))?;
                self.show_view(
                    uid,
                    session,
                    &menu::settings_text(&record),
                    menu::settings_keyboard(),
                )
                .await
            }
            "menu_withdraw" => {
                self.show_view(
                    uid,
                    session,
                    "Withdraw SOL or tokens?",
                    menu::withdraw_keyboard(),
                )
                .await
            }
            "menu_refresh" => self.render_menu(uid, session).await,
            "set_priority_level" => {
                self.show_view(
                    uid,
                    session,
                    "Pick a priority level:",
                    menu::priority_keyboard(),
                )
                .await
            }
            "set_priority_low" | "set_priority_medium" | "set_priority_high"
            | "set_priority_turbo" => {
                let level = data.trim_start_matches("set_priority_");
                let level = PriorityLevel::parse(level)
                    .ok_or_else(|| Error::InvalidInput("Unknown priority level".into()))?;
                self.store.update_priority_level(uid, level).await?;
                self.render_menu(uid, session).await
            }
            "set_buy_slip" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::SlipBuy,
                    "Send the buy slippage percent (0-100):",
                )
                .await
            }
            "set_sell_slip" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::SlipSell,
                    "Send the sell slippage percent (0-100):",
                )
                .await
            }
            "set_withdrawal_address" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::WithdrawalAddress,
                    "Send the withdrawal address (44 characters):",
                )
                .await
            }
            "withdraw_sol" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::WithdrawSol,
                    "Send the SOL amount to withdraw:",
                )
                .await
            }
            "withdraw_tokens" => {
                self.prompt(
                    uid,
                    session,
                    AwaitingAction::WithdrawTokens,
                    "Send: <code>&lt;mint&gt; &lt;amount&gt;</code>",
                )
                .await
            }
            "retry_access" => self.render_menu(uid, session).await,
            other => {
                debug!("Unknown callback tag {:?} from {}", other, uid);
                Ok(())
            }
        }
    }

    /// Run the consumed prompt answer, then refresh the menu no matter
    /// how the handler fared
    async fn handle_awaiting(
        &self,
        uid: i64,
        session: &mut UserSession,
        action: AwaitingAction,
        text: &str,
    ) -> Result<()> {
        let result = self.run_awaiting(uid, action, text).await;

        match &result {
            Ok(reply) => {
                let _ = self.transport.send_message(uid, reply, None).await;
            }
            Err(e) if e.is_user_facing() => {
                let _ = self.transport.send_message(uid, &e.to_string(), None).await;
            }
            Err(_) => {}
        }

        if let Err(e) = self.render_menu(uid, session).await {
            debug!("Menu refresh failed for {}: {}", uid, e);
        }

        match result {
            Err(e) if !e.is_user_facing() => Err(e),
            _ => Ok(()),
        }
    }

    async fn run_awaiting(&self, uid: i64, action: AwaitingAction, text: &str) -> Result<String> {
        match action {
            AwaitingAction::Buy => {
                let outcome = self.orchestrator.process_buy(uid, text).await?;
                Ok(trade_message("Buy", &outcome))
            }
            AwaitingAction::Sell => {
                let outcome = self.orchestrator.process_sell(uid, text).await?;
                Ok(trade_message("Sell", &outcome))
            }
            AwaitingAction::SlipBuy => {
                let pct = parse_slippage(text)?;
                self.store.update_slippage(uid, SlipSide::Buy, pct).await?;
                Ok(format!("Buy slippage set to {}%", pct))
            }
            AwaitingAction::SlipSell => {
                let pct = parse_slippage(text)?;
                self.store.update_slippage(uid, SlipSide::Sell, pct).await?;
                Ok(format!("Sell slippage set to {}%", pct))
            }
            AwaitingAction::WithdrawalAddress => {
                let address = text.trim();
                if address.len() != 44 {
                    return Err(Error::InvalidInput(
                        "Address must be exactly 44 characters".into(),
                    ));
                }
                self.store
                    .update_withdraw_address(uid, address.to_string())
                    .await?;
                Ok("Withdrawal address saved.".into())
            }
            AwaitingAction::WithdrawSol => {
                let sig = self.orchestrator.process_withdraw_sol(uid, text).await?;
                Ok(format!("Withdrawal sent.\nSignature: <code>{}</code>", sig))
            }
            AwaitingAction::WithdrawTokens => {
                let sig = self.orchestrator.process_withdraw_tokens(uid, text).await?;
                Ok(format!("Withdrawal sent.\nSignature: <code>{}</code>", sig))
            }
            AwaitingAction::BurnTokens => {
                let sig = self.orchestrator.process_burn_tokens(uid, text).await?;
                Ok(format!("Burn sent.\nSignature: <code>{}</code>", sig))
            }
        }
    }

    /// Set a pending prompt and ask for the answer
    async fn prompt(
        &self,
        uid: i64,
        session: &mut UserSession,
        action: AwaitingAction,
        text: &str,
    ) -> Result<()> {
        session.awaiting = Some(action);
        self.transport.send_message(uid, text, None).await.map(|_| ())
    }

    /// Refresh balances and render the main menu, editing in place when
    /// a menu message exists and falling back to a fresh send
    async fn render_menu(&self, uid: i64, session: &mut UserSession) -> Result<()> {
        if let Err(e) = self.orchestrator.refresh_sol_balance(uid).await {
            warn!("SOL balance refresh failed for {}: {}", uid, e);
        }
        if let Err(e) = self.orchestrator.refresh_token_balances(uid).await {
            warn!("Token balance refresh failed for {}: {}", uid, e);
        }

        let record = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        self.show_view(
            uid,
            session,
            &menu::main_menu_text(&record),
            menu::main_menu_keyboard(),
        )
        .await
    }

    async fn show_view(
        &self,
        uid: i64,
        session: &mut UserSession,
        text: &str,
        keyboard: Keyboard,
    ) -> Result<()> {
        if let Some(message_id) = session.menu_msg {
            match self
                .transport
                .edit_message(uid, message_id, text, Some(keyboard.clone()))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => debug!("In-place edit failed, sending fresh: {}", e),
            }
        }
        session.menu_msg = self.transport.send_message(uid, text, Some(keyboard)).await?;
        Ok(())
    }

    /// Token listing with per-token metadata and price. Tokens whose
    /// metadata lookup fails are skipped.
    async fn render_token_list(&self, uid: i64, session: &mut UserSession) -> Result<()> {
        if let Err(e) = self.orchestrator.refresh_token_balances(uid).await {
            warn!("Token balance refresh failed for {}: {}", uid, e);
        }

        let record = self
            .store
            .get(uid)
            .await?
            .ok_or(Error::WalletMissing(uid))?;

        if record.tokens.is_empty() {
            self.transport
                .send_message(uid, "No tokens held.", None)
                .await?;
            return Ok(());
        }

        let mut text = String::from("<b>Your tokens</b>\n");
        for token in &record.tokens {
            let info = match self.router.get_token_info(&token.mint).await {
                Ok(Some(info)) => info,
                Ok(None) => {
                    debug!("No metadata for {}, skipping", token.mint);
                    continue;
                }
                Err(e) => {
                    debug!("Metadata lookup failed for {}: {}", token.mint, e);
                    continue;
                }
            };
            let price = self
                .router
                .get_price(&token.mint, &token.pool, &token.dex)
                .await
                .unwrap_or(None);
            text.push_str(&menu::token_line(token, &info, price));
        }

        self.show_view(uid, session, &text, Keyboard::single("Burn", "menu_burn_tokens"))
            .await
    }
}

fn parse_slippage(text: &str) -> Result<f64> {
    text.trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .ok()
        .filter(|p| (0.0..=100.0).contains(p))
        .ok_or_else(|| Error::InvalidInput("Slippage must be between 0 and 100".into()))
}

fn trade_message(label: &str, outcome: &TradeOutcome) -> String {
    match outcome {
        TradeOutcome::Confirmed { signature } => {
            format!("{} confirmed.\nSignature: <code>{}</code>", label, signature)
        }
        TradeOutcome::Failed { signature, diag } => match diag {
            FailureDiag::PriorityFeeTooHigh => format!(
                "{} failed: the priority fee spiked too high. \
                 Try again or lower your priority level.",
                label
            ),
            FailureDiag::SimulationFailed(reason) => {
                format!("{} failed in simulation: {}", label, reason)
            }
            FailureDiag::Other(_) => format!(
                "{} failed.\nSignature: <code>{}</code>",
                label, signature
            ),
        },
    }
}

fn help_text() -> &'static str {
    "Commands:\n\
     /start - create your wallet and open the menu\n\
     /menu - open the menu\n\
     /help - this message\n\n\
     Use the menu buttons to trade, withdraw, and tune settings."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletDefaultsConfig;
    use crate::guard::{MembershipCheck, OpenMembership};
    use crate::router::{SwapAction, SwapAmount, SwapOutcome, TokenInfo, Venue};
    use crate::store::backend::MemoryBackend;
    use async_trait::async_trait;
    use solana_sdk::signature::Keypair;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullRouter;

    #[async_trait]
    impl Router for NullRouter {
        async fn detect(&self, _: &str, _: &[String]) -> Result<Option<Venue>> {
            Ok(None)
        }

        async fn swap(
            &self,
            _: SwapAction,
            _: &str,
            _: &str,
            _: SwapAmount,
            _: f64,
            _: &str,
            _: &str,
            _: &Keypair,
        ) -> Result<SwapOutcome> {
            Ok(SwapOutcome::Replay)
        }

        async fn get_balance(&self, _: &str, _: &str) -> Result<f64> {
            Ok(0.0)
        }

        async fn get_multiple_balances(
            &self,
            mints: &[String],
            _: &str,
        ) -> Result<HashMap<String, f64>> {
            Ok(mints.iter().map(|m| (m.clone(), 0.0)).collect())
        }

        async fn get_price(&self, _: &str, _: &str, _: &str) -> Result<Option<f64>> {
            Ok(None)
        }

        async fn get_decimals(&self, _: &str) -> Result<Option<u8>> {
            Ok(Some(6))
        }

        async fn get_token_info(&self, _: &str) -> Result<Option<TokenInfo>> {
            Ok(None)
        }

        async fn send_transfer(
            &self,
            _: &Keypair,
            _: &str,
            _: f64,
            _: &str,
            _: &str,
        ) -> Result<String> {
            Ok("sig".into())
        }

        async fn close_token_account(&self, _: &Keypair, _: &str, _: u64, _: u8) -> Result<String> {
            Ok("sig".into())
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(i64, String)>>,
        edits: Mutex<Vec<(i64, i64, String)>>,
        next_msg_id: AtomicI64,
        fail_edits: AtomicBool,
    }

    impl RecordingTransport {
        fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_message(
            &self,
            uid: i64,
            text: &str,
            _keyboard: Option<Keyboard>,
        ) -> Result<Option<i64>> {
            self.sent.lock().unwrap().push((uid, text.to_string()));
            Ok(Some(self.next_msg_id.fetch_add(1, Ordering::SeqCst) + 1))
        }

        async fn edit_message(
            &self,
            uid: i64,
            message_id: i64,
            text: &str,
            _keyboard: Option<Keyboard>,
        ) -> Result<()> {
            if self.fail_edits.load(Ordering::SeqCst) {
                return Err(Error::Transport("message is gone".into()));
            }
            self.edits
                .lock()
                .unwrap()
                .push((uid, message_id, text.to_string()));
            Ok(())
        }

        async fn answer_callback(&self, _: &str) -> Result<()> {
            Ok(())
        }

        async fn send_photo(&self, _: i64, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        controller: ConversationController,
        transport: Arc<RecordingTransport>,
        store: Arc<WalletStore>,
        registry: Arc<SessionRegistry>,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(OpenMembership))
    }

    fn fixture_with(membership: Arc<dyn MembershipCheck>) -> Fixture {
        let store = Arc::new(WalletStore::new(
            Arc::new(MemoryBackend::new()),
            WalletDefaultsConfig::default(),
        ));
        let router: Arc<dyn Router> = Arc::new(NullRouter);
        let registry = Arc::new(SessionRegistry::new());
        let orchestrator = Arc::new(SwapOrchestrator::new(
            store.clone(),
            router.clone(),
            registry.clone(),
            2_039_280,
            5,
        ));
        let transport = Arc::new(RecordingTransport::default());
        let guard = Arc::new(AdmissionGuard::new(
            Duration::from_secs(10),
            5,
            &[],
            membership,
        ));
        let controller = ConversationController::new(
            transport.clone(),
            store.clone(),
            orchestrator,
            router,
            guard,
            registry.clone(),
            "banner.png".into(),
        );
        Fixture {
            controller,
            transport,
            store,
            registry,
        }
    }

    fn message(uid: i64, text: &str) -> InboundEvent {
        InboundEvent::Message {
            uid,
            username: "tester".into(),
            text: text.into(),
        }
    }

    fn callback(uid: i64, data: &str) -> InboundEvent {
        InboundEvent::Callback {
            uid,
            callback_id: "cb".into(),
            message_id: 7,
            data: data.into(),
        }
    }

    #[tokio::test]
    async fn test_start_creates_wallet_exactly_once() {
        let f = fixture();

        f.controller.handle_event(message(1, "/start")).await;
        let first = f.store.get(1).await.unwrap().unwrap();
        assert!(f
            .transport
            .sent_texts()
            .iter()
            .any(|t| t.contains("Wallet created")));

        f.controller.handle_event(message(1, "/start")).await;
        let second = f.store.get(1).await.unwrap().unwrap();
        assert_eq!(first.pubkey, second.pubkey);
        assert!(f
            .transport
            .sent_texts()
            .iter()
            .any(|t| t.contains("already have a wallet")));
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_sixth_event() {
        let f = fixture();
        f.controller.handle_event(message(1, "/start")).await;
        for _ in 0..4 {
            f.controller.handle_event(message(1, "/menu")).await;
        }

        let before = f.transport.sent_texts().len();
        f.controller.handle_event(message(1, "/menu")).await;
        let texts = f.transport.sent_texts();
        assert_eq!(texts.len(), before + 1);
        assert!(texts.last().unwrap().contains("Too many requests"));
    }

    #[tokio::test]
    async fn test_callback_sets_awaiting_and_free_text_consumes_it() {
        let f = fixture();
        f.controller.handle_event(message(1, "/start")).await;

        f.controller.handle_event(callback(1, "menu_buy")).await;
        assert_eq!(
            f.registry.session(1).lock().await.awaiting,
            Some(AwaitingAction::Buy)
        );

        // NullRouter detects nothing, so the buy surfaces PoolNotFound
        f.controller
            .handle_event(message(1, "Ey2zpXcVpmLnBEyBJ5wZZr9st2SRRkW3bSumFMY9pump 0.1"))
            .await;
        assert!(f.registry.session(1).lock().await.awaiting.is_none());
        assert!(f
            .transport
            .sent_texts()
            .iter()
            .any(|t| t.contains("No pool found")));

        // slot already consumed, next free text is ignored
        let before = f.transport.sent_texts().len();
        f.controller.handle_event(message(1, "whatever")).await;
        assert_eq!(f.transport.sent_texts().len(), before);
    }

    struct ClosedMembership;

    #[async_trait]
    impl MembershipCheck for ClosedMembership {
        async fn is_member(&self, _uid: i64) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_failed_retry_edits_prompt_instead_of_stacking() {
        let f = fixture_with(Arc::new(ClosedMembership));

        f.controller.handle_event(message(1, "/start")).await;
        let texts = f.transport.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Join the group"));

        for _ in 0..3 {
            f.controller.handle_event(callback(1, "retry_access")).await;
        }

        // still exactly one prompt message; retries edited it in place
        assert_eq!(f.transport.sent_texts().len(), 1);
        let edits = f.transport.edits.lock().unwrap();
        assert_eq!(edits.len(), 3);
        assert!(edits.iter().all(|(_, id, text)| *id == 7 && text.contains("Join the group")));
    }

    #[tokio::test]
    async fn test_pending_prompt_consumes_commands_too() {
        let f = fixture();
        f.controller.handle_event(message(1, "/start")).await;
        f.controller.handle_event(callback(1, "menu_buy")).await;

        // a slash command arriving while a prompt is armed answers it
        f.controller.handle_event(message(1, "/menu")).await;
        assert!(f.registry.session(1).lock().await.awaiting.is_none());
        assert!(f
            .transport
            .sent_texts()
            .iter()
            .any(|t| t.contains("Invalid input")));

        // the slot is gone, so the next free text is plain chatter
        let before = f.transport.sent_texts().len();
        f.controller.handle_event(message(1, "hello")).await;
        assert_eq!(f.transport.sent_texts().len(), before);
    }

    #[tokio::test]
    async fn test_withdrawal_address_length_enforced() {
        let f = fixture();
        f.controller.handle_event(message(1, "/start")).await;

        f.controller
            .handle_event(callback(1, "set_withdrawal_address"))
            .await;
        f.controller.handle_event(message(1, "tooshort")).await;
        assert!(f
            .transport
            .sent_texts()
            .iter()
            .any(|t| t.contains("exactly 44 characters")));
        assert!(f.store.get(1).await.unwrap().unwrap().withdraw_to.is_empty());

        f.controller
            .handle_event(callback(1, "set_withdrawal_address"))
            .await;
        let address = "9zQabsVnCsWBkwP7mYJVkLyn6mQbYqHHxCrHc4Lr2WnQ";
        f.controller.handle_event(message(1, address)).await;
        assert_eq!(f.store.get(1).await.unwrap().unwrap().withdraw_to, address);
    }

    #[tokio::test]
    async fn test_priority_callback_updates_record() {
        let f = fixture();
        f.controller.handle_event(message(1, "/start")).await;

        f.controller
            .handle_event(callback(1, "set_priority_turbo"))
            .await;
        assert_eq!(
            f.store.get(1).await.unwrap().unwrap().priority_level,
            PriorityLevel::Turbo
        );
    }

    #[tokio::test]
    async fn test_edit_failure_falls_back_to_fresh_render() {
        let f = fixture();
        f.controller.handle_event(message(1, "/start")).await;

        f.transport.fail_edits.store(true, Ordering::SeqCst);
        let before = f.transport.sent_texts().len();
        f.controller.handle_event(callback(1, "menu_refresh")).await;

        // a fresh message went out instead of an edit
        assert!(f.transport.sent_texts().len() > before);
        assert!(f.transport.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_menu_without_wallet_reports_missing() {
        let f = fixture();
        f.controller.handle_event(message(1, "/menu")).await;
        assert!(f
            .transport
            .sent_texts()
            .iter()
            .any(|t| t.contains("No wallet found")));
    }

    #[test]
    fn test_parse_slippage() {
        assert_eq!(parse_slippage("15").unwrap(), 15.0);
        assert_eq!(parse_slippage("15%").unwrap(), 15.0);
        assert!(parse_slippage("101").is_err());
        assert!(parse_slippage("-1").is_err());
        assert!(parse_slippage("abc").is_err());
    }
}
