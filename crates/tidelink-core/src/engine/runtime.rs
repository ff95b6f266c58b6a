impl<D, KV> ConnectionEngine<D, KV>
where
    D: NetworkDriver,
    KV: KeyValueStore,
{
    /// Advances the state machine by at most one step. Never blocks.
    pub fn tick(&mut self, now_ms: u64) -> TickResult {
        let before = self.status;
        let was_portal = matches!(self.state, EngineState::ConfigPortal { .. });

        self.apply_pending(now_ms);

        match self.state {
            EngineState::Idle => self.start_attempt(now_ms),
            EngineState::Connecting { deadline_ms, .. } => self.tick_connecting(now_ms, deadline_ms),
            EngineState::Connected { refreshing, .. } => self.tick_connected(now_ms, refreshing),
            EngineState::Failed { reason, scan } => self.tick_failed(now_ms, reason, scan),
            EngineState::Retrying { due_ms } => {
                if now_ms >= due_ms {
                    self.start_attempt(now_ms);
                }
            }
            EngineState::ConfigPortal { .. } => {}
        }

        let is_portal = matches!(self.state, EngineState::ConfigPortal { .. });
        if is_portal && !was_portal {
            TickResult::ConfigPortalRequested
        } else if self.status != before {
            TickResult::StatusChanged(self.status)
        } else {
            TickResult::Unchanged
        }
    }

    fn apply_pending(&mut self, now_ms: u64) {
        if core::mem::take(&mut self.reset_requested) {
            info!("wifi: factory reset (state={})", self.state.as_str());
            self.driver.disconnect();
            if let Err(err) = self.store.clear() {
                warn!("wifi: fingerprint clear failed: {:?}", err);
            }
            self.stored = Fingerprint::new();
            self.target = None;
            self.clear_transient();
        }

        if let Some((identity, credentials)) = self.pending_credentials.take() {
            info!(
                "wifi: credentials updated ssid={} open={} (state={}, t={}ms)",
                identity.ssid(),
                credentials.is_open(),
                self.state.as_str(),
                now_ms
            );
            if !matches!(
                self.state,
                EngineState::Idle | EngineState::ConfigPortal { .. }
            ) {
                self.driver.disconnect();
            }
            self.target = Some((identity, credentials));
            // The saved neighbourhood belongs to the old network; flash keeps
            // it until the next successful connection overwrites it.
            self.stored = Fingerprint::new();
            self.clear_transient();
        }
    }

    fn clear_transient(&mut self) {
        self.retry.reset();
        self.attempt = None;
        self.last_failure = None;
        self.reconnected = false;
        self.scan.clear();
        self.state = EngineState::Idle;
    }

    fn start_attempt(&mut self, now_ms: u64) {
        let Some((identity, credentials)) = self.target.as_ref() else {
            info!("wifi: no credentials stored; requesting configuration");
            self.enter_portal(PortalReason::Unconfigured);
            return;
        };

        let mut deadline_ms =
            now_ms.saturating_add(self.config.connect_timeout_for(self.retry.failures()));
        if let Some(window_end_ms) = self.retry.window_end_ms(self.config.retry.streak_window_ms) {
            // The last attempt of a streak still gets the base timeout.
            let floor_ms = now_ms.saturating_add(self.config.connect_timeout_ms);
            deadline_ms = deadline_ms.min(window_end_ms.max(floor_ms));
        }
        let timeout_ms = deadline_ms - now_ms;
        info!(
            "wifi: connecting ssid={} attempt={} timeout={}ms",
            identity.ssid(),
            self.retry.failures().saturating_add(1),
            timeout_ms
        );
        self.attempt = Some(ConnectionAttempt {
            target: identity.clone(),
            started_ms: now_ms,
            outcome: AttemptOutcome::Pending,
        });

        if let Err(err) = self.driver.begin_connect(identity, credentials) {
            warn!("wifi: driver refused connect: {:?}", err);
            self.fail(now_ms, FailureReason::Driver);
            return;
        }

        self.state = EngineState::Connecting {
            started_ms: now_ms,
            deadline_ms,
        };
        self.status = if self.retry.in_streak() {
            ConnectivityStatus::WiFiError
        } else {
            ConnectivityStatus::Connecting
        };
    }

    fn tick_connecting(&mut self, now_ms: u64, deadline_ms: u64) {
        match self.driver.poll_connect() {
            ConnectPoll::Pending if now_ms >= deadline_ms => {
                self.driver.disconnect();
                self.fail(now_ms, FailureReason::Timeout);
            }
            ConnectPoll::Pending => {}
            ConnectPoll::Connected(address) => self.on_connected(now_ms, address),
            ConnectPoll::Failed(reason) => self.fail(now_ms, reason),
        }
    }

    fn on_connected(&mut self, now_ms: u64, address: Ipv4Addr) {
        let streak = self.retry.failures();
        info!(
            "wifi: connected address={} after_failures={} t={}ms",
            address, streak, now_ms
        );
        if streak > 0 {
            self.reconnected = true;
        }
        self.retry.reset();
        self.last_failure = None;
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.outcome = AttemptOutcome::Success;
        }

        let refreshing = match self.driver.begin_scan() {
            Ok(()) => true,
            Err(err) => {
                warn!("wifi: fingerprint scan not started: {:?}", err);
                false
            }
        };
        self.state = EngineState::Connected {
            address,
            refreshing,
        };
        self.status = ConnectivityStatus::ConnectedFresh;
    }

    fn tick_connected(&mut self, now_ms: u64, refreshing: bool) {
        if refreshing {
            match self.driver.poll_scan(&mut self.scan) {
                ScanPoll::Pending => {}
                ScanPoll::Complete => {
                    self.refresh_fingerprint();
                    self.mark_refreshed();
                }
                ScanPoll::Failed => {
                    warn!("wifi: fingerprint scan failed; keeping previous");
                    self.mark_refreshed();
                }
            }
        }

        if let Some(reason) = self.driver.poll_link_lost() {
            warn!("wifi: link lost reason={}", reason.as_str());
            self.fail(now_ms, reason);
        }
    }

    fn mark_refreshed(&mut self) {
        if let EngineState::Connected { refreshing, .. } = &mut self.state {
            *refreshing = false;
        }
    }

    fn refresh_fingerprint(&mut self) {
        let Some((target, _)) = self.target.as_ref() else {
            return;
        };
        let captured = Fingerprint::capture(target, &self.scan);
        if captured.is_empty() {
            warn!("wifi: no neighbours visible; keeping previous fingerprint");
            return;
        }
        if captured.same_entries(&self.stored) {
            return;
        }

        if let Err(err) = self.store.save(&captured) {
            warn!("wifi: fingerprint save failed: {:?}", err);
        }
        info!("wifi: fingerprint updated ({} neighbours)", captured.len());
        self.stored = captured;
    }

    fn fail(&mut self, now_ms: u64, reason: FailureReason) {
        self.retry.record_failure(now_ms);
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.outcome = AttemptOutcome::Failure(reason);
        }
        self.last_failure = Some(FailureCause::from_reason(reason));
        warn!(
            "wifi: attempt failed reason={} failures={}",
            reason.as_str(),
            self.retry.failures()
        );
        self.state = EngineState::Failed {
            reason,
            scan: ScanStage::NotStarted,
        };
        self.status = ConnectivityStatus::WiFiError;
    }

    fn tick_failed(&mut self, now_ms: u64, reason: FailureReason, scan: ScanStage) {
        match scan {
            ScanStage::NotStarted => match self.driver.begin_scan() {
                Ok(()) => {
                    self.state = EngineState::Failed {
                        reason,
                        scan: ScanStage::InFlight,
                    };
                }
                Err(err) => {
                    warn!("wifi: diagnostic scan not started: {:?}", err);
                    self.decide(now_ms, reason, false);
                }
            },
            ScanStage::InFlight => match self.driver.poll_scan(&mut self.scan) {
                ScanPoll::Pending => {}
                ScanPoll::Complete => self.decide(now_ms, reason, true),
                ScanPoll::Failed => self.decide(now_ms, reason, false),
            },
        }
    }

    /// Folds the failure into the retry policy. `scanned` tells whether
    /// `self.scan` holds a fresh scan.
    fn decide(&mut self, now_ms: u64, reason: FailureReason, scanned: bool) {
        let Some((target, _)) = self.target.as_ref() else {
            self.enter_portal(PortalReason::Unconfigured);
            return;
        };

        let visible = scanned.then_some(self.scan.as_slice());
        let location = classify(&self.stored, visible, target);
        let cause = diagnose(target, reason, visible, self.config.weak_signal_dbm);
        let action = self.config.retry.next_action(&self.retry, location);

        info!(
            "wifi: failure cause=\"{}\" location={} action={:?}",
            cause.message(),
            location.as_str(),
            action
        );
        self.last_failure = Some(cause);

        match action {
            RetryAction::RetryNow => {
                self.state = EngineState::Retrying { due_ms: now_ms };
            }
            RetryAction::RetryAfterDelay { delay_ms } => {
                self.state = EngineState::Retrying {
                    due_ms: now_ms.saturating_add(delay_ms),
                };
            }
            RetryAction::EnterConfigPortal(portal_reason) => {
                if portal_reason == PortalReason::Relocated {
                    self.last_failure = Some(FailureCause::NewLocation);
                }
                self.enter_portal(portal_reason);
            }
        }
    }

    fn enter_portal(&mut self, reason: PortalReason) {
        info!("wifi: entering configuration portal reason={}", reason.as_str());
        if !matches!(self.state, EngineState::Idle) {
            self.driver.disconnect();
        }
        self.retry.reset();
        self.state = EngineState::ConfigPortal { reason };
        self.status = ConnectivityStatus::ConfigPortalRequired;
    }
}
