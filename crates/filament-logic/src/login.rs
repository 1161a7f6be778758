//! Login and logout handlers.
//!
//! `login.signin` is the only command whose session arrives in the body;
//! it creates the cluster-visible session, evicting any previous login of
//! the same account. `login.signout` removes it again; the gateway also
//! sends one on every disconnect.

use filament_container::Context;
use filament_core::Error;
use filament_proto::{
    payloads::{KickoutNotify, LoginResponse},
    Session, Status,
};
use tracing::info;

/// Handle `login.signin`.
pub async fn sign_in(ctx: Context) {
    let session: Session = match ctx.read_body() {
        Ok(session) => session,
        Err(e) => {
            ctx.resp_with_error(Status::InvalidPacketBody, e).await;
            return;
        },
    };

    info!(
        channel = %session.channel_id,
        account = %session.account,
        remote_ip = %session.remote_ip,
        "do login"
    );

    // A second login for the same account evicts the first.
    match ctx.get_location(&session.account, "").await {
        Ok(old) => {
            let kicked = KickoutNotify { channel_id: old.channel_id.clone() };
            let _ = ctx.dispatch(&kicked, std::slice::from_ref(&old)).await;
        },
        Err(filament_container::ContainerError::Fabric(Error::SessionNil)) => {},
        Err(e) => {
            ctx.resp_with_error(Status::SystemException, e).await;
            return;
        },
    }

    if let Err(e) = ctx.storage().add(&session).await {
        ctx.resp_with_error(Status::SystemException, e).await;
        return;
    }

    let resp = LoginResponse { channel_id: session.channel_id.clone() };
    if let Err(e) = ctx.resp(Status::Success, Some(&resp)).await {
        tracing::error!(error = %e, "login response failed");
    }
}

/// Handle `login.signout`.
pub async fn sign_out(ctx: Context) {
    info!(
        channel = %ctx.session().channel_id,
        account = %ctx.session().account,
        "do logout"
    );

    if let Err(e) = ctx
        .storage()
        .delete(&ctx.session().account, &ctx.session().channel_id)
        .await
    {
        ctx.resp_with_error(Status::SystemException, e).await;
        return;
    }

    if let Err(e) = ctx.resp::<()>(Status::Success, None).await {
        tracing::error!(error = %e, "logout response failed");
    }
}
