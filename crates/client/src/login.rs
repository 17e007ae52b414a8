//! Consumes a login RPC response and bootstraps the first circuit. The
//! RPC transport itself (XML-RPC or LLSD-over-HTTP) lives behind
//! [`LoginTransport`]; grid responses of either shape normalize to a
//! [`serde_json::Value`] map.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use sim_proto::login::{LoginReply, LoginRequest, LoginState};
use sim_proto::messages::Message;

use crate::error::LoginError;
use crate::events::{ClientEvent, LoginStatus};
use crate::session::Session;

pub trait LoginTransport: Send + Sync {
    fn post(
        &self,
        url: &str,
        request: &LoginRequest,
    ) -> impl Future<Output = Result<serde_json::Value, LoginError>> + Send;
}

/// Run the login state machine: post the request, follow `indeterminate`
/// redirects, then bring up the first circuit as the current simulator.
pub async fn login<T: LoginTransport>(
    session: &Session,
    transport: &T,
    login_url: &str,
    request: &LoginRequest,
) -> Result<LoginReply, LoginError> {
    let mut url = login_url.to_owned();
    let attempt_timeout = session.settings().login_timeout();

    loop {
        progress(
            session,
            LoginStatus::ConnectingToLogin,
            &format!("logging in as {} {}", request.first, request.last),
            None,
        );

        let value = match tokio::time::timeout(attempt_timeout, transport.post(&url, request)).await
        {
            Ok(result) => result?,
            Err(_) => {
                let message = "login request timed out".to_owned();
                progress(session, LoginStatus::Failed, &message, Some("timeout"));
                return Err(LoginError::Transport(message));
            }
        };

        progress(session, LoginStatus::ReadingResponse, "reading response", None);
        let reply = LoginReply::from_value(&value)?;

        match reply.state {
            LoginState::Indeterminate => {
                let Some(redirect) = reply.redirect.clone() else {
                    return Err(LoginError::Transport(
                        "indeterminate response without redirect".to_owned(),
                    ));
                };
                progress(
                    session,
                    LoginStatus::Redirecting,
                    &format!("redirected to {}", redirect.next_url),
                    None,
                );
                tokio::time::sleep(Duration::from_secs(redirect.next_duration)).await;
                url = redirect.next_url;
            }
            LoginState::Failure => {
                let reason = reply.reason.clone().unwrap_or_else(|| "unknown".to_owned());
                let message = reply
                    .message
                    .clone()
                    .unwrap_or_else(|| "login failed".to_owned());
                progress(session, LoginStatus::Failed, &message, Some(&reason));
                return Err(LoginError::Failed { reason, message });
            }
            LoginState::Success => {
                return complete_login(session, reply).await;
            }
        }
    }
}

async fn complete_login(session: &Session, reply: LoginReply) -> Result<LoginReply, LoginError> {
    session.agent().set_ids(reply.agent_id, reply.session_id);
    session.set_circuit_code(reply.circuit_code);
    session.pipeline().set_blacklist(&reply.udp_blacklist);

    let Some(ip) = reply.sim_ip else {
        let message = "login response carries no simulator address".to_owned();
        progress(session, LoginStatus::Failed, &message, Some("no-sim"));
        return Err(LoginError::Transport(message));
    };
    let address = SocketAddr::from((ip, reply.sim_port));

    progress(
        session,
        LoginStatus::ConnectingToSim,
        &format!("connecting to {address}"),
        None,
    );
    let circuit = session
        .connect(
            address,
            reply.region_handle(),
            true,
            reply.seed_capability.clone(),
        )
        .await
        .map_err(LoginError::Connect)?;

    // first application-level packet; confirms two-way traffic
    if let Err(e) = circuit.send(&Message::EconomyDataRequest).await {
        log::debug!("economy data request failed: {e}");
    }

    progress(
        session,
        LoginStatus::Success,
        reply.message.as_deref().unwrap_or("connected"),
        None,
    );
    log::info!(
        "logged in as {} {} ({})",
        reply.first_name,
        reply.last_name,
        reply.agent_id
    );
    Ok(reply)
}

fn progress(session: &Session, status: LoginStatus, message: &str, reason: Option<&str>) {
    session.events().emit(ClientEvent::LoginProgress {
        status,
        message: message.to_owned(),
        reason: reason.map(str::to_owned),
    });
}
