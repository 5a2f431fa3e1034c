use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post},
    Router,
};

use super::{reply, AppState, AuthUser, JsonBody};
use crate::models::teams::{AddMemberRequest, CreateTeamRequest};
use crate::services::{dispatch, teams::TeamRequest, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_teams).post(create_team))
        .route("/{team_id}/members", post(add_member))
        .route("/{team_id}/members/{member_id}", delete(remove_member))
}

async fn list_teams(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let teams = dispatch(&state.channels.teams, |response| TeamRequest::List {
        user_id: user.user_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Teams retrieved", teams))
}

async fn create_team(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<CreateTeamRequest>,
) -> Result<Response, ServiceError> {
    let team = dispatch(&state.channels.teams, |response| TeamRequest::Create {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::CREATED, "Team created", team))
}

async fn add_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path(team_id): Path<String>,
    JsonBody(request): JsonBody<AddMemberRequest>,
) -> Result<Response, ServiceError> {
    let team = dispatch(&state.channels.teams, |response| TeamRequest::AddMember {
        user_id: user.user_id,
        team_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Member added", team))
}

async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path((team_id, member_id)): Path<(String, String)>,
) -> Result<Response, ServiceError> {
    let team = dispatch(&state.channels.teams, |response| TeamRequest::RemoveMember {
        user_id: user.user_id,
        team_id,
        member_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Member removed", team))
}
