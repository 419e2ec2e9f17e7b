// ===============================
// src/gateway_binance.rs
// ===============================
//
// Binance Spot venue: REST bertanda tangan untuk create/cancel/query/openOrders,
// ack & fill dari userDataStream (executionReport) ke intake queue.
//
// - Order: LIMIT_MAKER (post-only), newClientOrderId = order id engine.
// - HTTP 4xx = venue menolak (Rejected); network / 5xx = Transport.
//
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Method;
use tokio::{
    task::JoinHandle,
    time::{interval, sleep, Duration, MissedTickBehavior},
};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::binance::{
    from_scaled, map_execution_report, rest_error, side_str, sign_query, timestamp_ms, ApiError, ExecutionReport,
    RestOrder, WsEnvelope, ERR_NO_SUCH_ORDER,
};
use crate::config::BinanceSettings;
use crate::domain::{wall_clock_ns, EngineEvent, VenueAck, VenueOrderId};
use crate::engine::IntakeTx;
use crate::gateway::{GatewayError, NewOrder, OpenOrder, OrderRef, VenueGateway, VenueOrderStatus};
use crate::metrics::{BIN_LISTEN_KEEPALIVE, BIN_WS_CONNECTED, BIN_WS_RECONNECTS, EXECS};

const KEEPALIVE_EVERY: Duration = Duration::from_secs(30 * 60);

pub struct BinanceGateway {
    http: reqwest::Client,
    cfg: BinanceSettings,
    tx: IntakeTx,
    venue: String,
}

fn transport(e: impl std::fmt::Display) -> GatewayError { GatewayError::Transport(e.to_string()) }

impl BinanceGateway {
    pub fn new(cfg: BinanceSettings, tx: IntakeTx) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().map_err(transport)?;
        Ok(Self { http, cfg, tx, venue: "binance".to_string() })
    }

    fn push(&self, ev: EngineEvent, label: &str) {
        if self.tx.send(ev).is_ok() {
            EXECS.with_label_values(&[label, &self.venue]).inc();
        }
    }

    /// Signed request; returns the body on 2xx.
    async fn signed(&self, method: Method, path: &str, mut params: Vec<(&str, String)>) -> Result<String, GatewayError> {
        params.push(("timestamp", timestamp_ms().to_string()));
        params.push(("recvWindow", self.cfg.recv_window.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sig = sign_query(&self.cfg.api_secret, &query).map_err(transport)?;
        let url = format!("{}{}?{}&signature={}", self.cfg.rest_url.trim_end_matches('/'), path, query, sig);

        let rsp = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", &self.cfg.api_key)
            .send()
            .await
            .map_err(transport)?;
        let status = rsp.status();
        let body = rsp.text().await.map_err(transport)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(rest_error(status.as_u16(), body))
        }
    }

    fn order_params(&self, order: &OrderRef) -> Vec<(&'static str, String)> {
        let mut params = vec![("symbol", order.symbol.to_ascii_uppercase())];
        match &order.venue_order_id {
            Some(vid) => params.push(("orderId", vid.0.clone())),
            None => params.push(("origClientOrderId", order.order_id.0.clone())),
        }
        params
    }

    async fn listen_key(&self, method: Method, key: Option<&str>) -> Result<String, GatewayError> {
        let mut url = format!("{}/api/v3/userDataStream", self.cfg.rest_url.trim_end_matches('/'));
        if let Some(k) = key {
            url = format!("{url}?listenKey={k}");
        }
        let rsp = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", &self.cfg.api_key)
            .send()
            .await
            .map_err(transport)?;
        if !rsp.status().is_success() {
            return Err(GatewayError::Rejected(rsp.text().await.unwrap_or_default()));
        }
        let v = rsp.json::<serde_json::Value>().await.map_err(transport)?;
        Ok(v.get("listenKey").and_then(|x| x.as_str()).unwrap_or_default().to_string())
    }

    /// Open the user-data stream and keep it alive. Acks and fills go to the
    /// intake queue from the spawned task.
    pub async fn start_user_stream(self: &Arc<Self>) -> Result<JoinHandle<()>, GatewayError> {
        let key = self.listen_key(Method::POST, None).await?;
        if key.is_empty() {
            return Err(GatewayError::Rejected("no listenKey".into()));
        }
        info!(venue = %self.venue, "listenKey created");

        let keepalive = {
            let gw = Arc::clone(self);
            let key = key.clone();
            tokio::spawn(async move {
                let mut tick = interval(KEEPALIVE_EVERY);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let result = match gw.listen_key(Method::PUT, Some(&key)).await {
                        Ok(_) => "ok",
                        Err(e) => {
                            warn!(error = %e, "listenKey keepalive failed");
                            "err"
                        }
                    };
                    BIN_LISTEN_KEEPALIVE.with_label_values(&[&gw.venue, result]).inc();
                }
            })
        };

        let gw = Arc::clone(self);
        Ok(tokio::spawn(async move {
            gw.user_stream_loop(&key).await;
            keepalive.abort();
        }))
    }

    async fn user_stream_loop(&self, listen_key: &str) {
        let ws_url = format!("{}/{}", self.cfg.ws_url.trim_end_matches('/'), listen_key);
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, "bad userDataStream url");
                return;
            }
        };
        loop {
            info!(venue = %self.venue, "connecting userDataStream");
            match connect_async(url.clone()).await {
                Ok((mut ws, _)) => {
                    BIN_WS_CONNECTED.with_label_values(&[&self.venue]).set(1);
                    while let Some(msg) = ws.next().await {
                        match msg {
                            Ok(m) if m.is_text() => {
                                let Ok(txt) = m.into_text() else { continue };
                                self.on_user_event(&txt);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(error = %e, "userDataStream ws error");
                                break;
                            }
                        }
                    }
                    BIN_WS_CONNECTED.with_label_values(&[&self.venue]).set(0);
                    warn!("userDataStream disconnected, reconnecting");
                }
                Err(e) => error!(error = %e, "connect userDataStream failed"),
            }
            BIN_WS_RECONNECTS.with_label_values(&[&self.venue]).inc();
            if self.tx.is_closed() {
                return;
            }
            sleep(Duration::from_secs(2)).await;
        }
    }

    fn on_user_event(&self, txt: &str) {
        let Ok(env) = serde_json::from_str::<WsEnvelope>(txt) else { return };
        if env.event_type.as_deref() != Some("executionReport") {
            return;
        }
        match serde_json::from_str::<ExecutionReport>(txt) {
            Ok(er) => match map_execution_report(&er, self.cfg.px_scale, self.cfg.qty_scale) {
                Some(ev) => {
                    let label = match &ev {
                        EngineEvent::Fill(_) => "filled",
                        EngineEvent::Ack(VenueAck::Accepted { .. }) => "ack",
                        EngineEvent::Ack(VenueAck::Rejected { .. }) => "rejected",
                        EngineEvent::Ack(VenueAck::CancelAck { .. }) => "cancelled",
                        _ => "other",
                    };
                    self.push(ev, label);
                }
                None => debug!(exec_type = %er.exec_type, "executionReport ignored"),
            },
            Err(e) => warn!(error = %e, "bad executionReport"),
        }
    }
}

#[async_trait]
impl VenueGateway for BinanceGateway {
    async fn create_order(&self, order: &NewOrder) -> Result<(), GatewayError> {
        let params = vec![
            ("symbol", order.symbol.to_ascii_uppercase()),
            ("side", side_str(order.side).to_string()),
            ("type", "LIMIT_MAKER".to_string()),
            ("quantity", from_scaled(order.qty, self.cfg.qty_scale)),
            ("price", from_scaled(order.px, self.cfg.px_scale)),
            ("newClientOrderId", order.order_id.0.clone()),
        ];
        let body = self.signed(Method::POST, "/api/v3/order", params).await?;
        match serde_json::from_str::<serde_json::Value>(&body).ok().and_then(|v| v.get("orderId")?.as_u64()) {
            Some(oid) => {
                info!(order_id = %order.order_id, venue_order_id = oid, "order accepted");
                self.push(
                    EngineEvent::Ack(VenueAck::Accepted {
                        order_id: order.order_id.clone(),
                        venue_order_id: VenueOrderId(oid.to_string()),
                        ts_ns: wall_clock_ns(),
                    }),
                    "ack",
                );
            }
            // ack tetap datang lewat userDataStream
            None => debug!(order_id = %order.order_id, %body, "create response without orderId"),
        }
        Ok(())
    }

    async fn cancel_order(&self, order: &OrderRef) -> Result<(), GatewayError> {
        self.signed(Method::DELETE, "/api/v3/order", self.order_params(order)).await?;
        self.push(
            EngineEvent::Ack(VenueAck::CancelAck { order_id: order.order_id.clone(), ts_ns: wall_clock_ns() }),
            "cancelled",
        );
        Ok(())
    }

    async fn query_order_status(&self, order: &OrderRef) -> Result<VenueOrderStatus, GatewayError> {
        match self.signed(Method::GET, "/api/v3/order", self.order_params(order)).await {
            Ok(body) => serde_json::from_str::<RestOrder>(&body)
                .map(|o| o.venue_status())
                .map_err(|e| GatewayError::Transport(format!("bad order response: {e}"))),
            Err(GatewayError::Rejected(body)) => match serde_json::from_str::<ApiError>(&body) {
                Ok(api) if api.code == ERR_NO_SUCH_ORDER => Ok(VenueOrderStatus::NotFound),
                _ => Err(GatewayError::Rejected(body)),
            },
            Err(e) => Err(e),
        }
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        let body = self.signed(Method::GET, "/api/v3/openOrders", vec![("symbol", symbol.to_ascii_uppercase())]).await?;
        let orders: Vec<RestOrder> =
            serde_json::from_str(&body).map_err(|e| GatewayError::Transport(format!("bad openOrders response: {e}")))?;
        Ok(orders.iter().filter_map(|o| o.to_open_order(self.cfg.px_scale, self.cfg.qty_scale)).collect())
    }
}
