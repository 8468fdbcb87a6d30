use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warp::ws::{Message, WebSocket};

use score_core::ScoreAggregator;
use score_types::{ScoreFeedMessage, UserId};

/// Push every score snapshot for `user_id` to the socket until either side
/// goes away. Closing the socket drops the subscription.
pub async fn handle_score_feed(
    websocket: WebSocket,
    user_id: UserId,
    aggregator: Arc<ScoreAggregator>,
) {
    info!("Score feed opened for {}", user_id);

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let mut subscription = aggregator.get_current_score(&user_id);

    // Clients only ever close or ping
    let incoming_handler = async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) if msg.is_close() => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Score feed error for {}: {}", user_id, e);
                    break;
                }
            }
        }
    };

    let outgoing_handler = async move {
        while let Some(score) = subscription.next().await {
            let json = match serde_json::to_string(&ScoreFeedMessage { user_id, score }) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize score update: {:?}", e);
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::text(json)).await {
                debug!("Failed to push score to {}: {:?}", user_id, e);
                break;
            }
        }
    };

    tokio::select! {
        _ = incoming_handler => {},
        _ = outgoing_handler => {},
    }

    info!("Score feed closed for {}", user_id);
}
