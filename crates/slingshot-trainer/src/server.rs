//! Learner server: hosts a [`LocalLearner`] behind the TCP learner transport
//!
//! Every connection gets its own task; all of them share one learner behind
//! a mutex, so actions and updates are serialized.

use metrics::increment_counter;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use slingshot_rl_agent::learner::{read_frame, write_frame, LearnerRequest, LearnerResponse};
use slingshot_rl_agent::{Learner, LocalLearner};
use slingshot_rl_core::{Action, Result, StateVector, Transition};

/// Learner shared by every connection
pub type SharedLearner = Arc<Mutex<LocalLearner>>;

/// Accept connections until `shutdown` resolves
///
/// Returns the learner so the caller can persist its parameters.
pub async fn serve<F>(listener: TcpListener, learner: LocalLearner, shutdown: F) -> SharedLearner
where
    F: Future<Output = ()>,
{
    let learner = Arc::new(Mutex::new(learner));
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "learner server listening");
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("learner server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "learner client connected");
                    let learner = Arc::clone(&learner);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, learner).await {
                            warn!(%peer, error = %e, "learner connection closed with an error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
    learner
}

fn transition_from_wire(
    state: Vec<f32>,
    action: [f32; 2],
    reward: f64,
    next_state: Vec<f32>,
    done: bool,
) -> Transition {
    Transition {
        state: StateVector(state),
        action: Action::from_array(action),
        reward,
        next_state: StateVector(next_state),
        done,
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    learner: SharedLearner,
) -> Result<()> {
    while let Some(request) = read_frame::<_, LearnerRequest>(&mut stream).await? {
        increment_counter!("slingshot_server_requests_total");
        match request {
            LearnerRequest::Act { state } => {
                let result = learner.lock().await.request_action(&StateVector(state)).await;
                let reply = match result {
                    Ok(action) => LearnerResponse::Action {
                        angle: action.angle,
                        force: action.force,
                    },
                    Err(e) => LearnerResponse::Error {
                        message: e.to_string(),
                    },
                };
                write_frame(&mut stream, &reply).await?;
            }
            LearnerRequest::Transition {
                state,
                action,
                reward,
                next_state,
                done,
            } => {
                let transition = transition_from_wire(state, action, reward, next_state, done);
                match learner.lock().await.push_transition(&transition).await {
                    Ok(Some(stats)) => {
                        debug!(%peer, total_loss = stats.total_loss, "policy updated");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%peer, error = %e, "transition rejected"),
                }
            }
            LearnerRequest::Close => {
                debug!(%peer, "learner client closed the connection");
                return Ok(());
            }
        }
    }
    debug!(%peer, "learner client disconnected");
    Ok(())
}
