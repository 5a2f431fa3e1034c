use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::{
        teams::{AddMemberRequest, CreateTeamRequest, Team, TeamView},
        users::UserSummary,
    },
    repositories::{teams::TeamRepository, users::UserRepository},
};

pub enum TeamRequest {
    List {
        user_id: String,
        response: Responder<Vec<TeamView>>,
    },
    Create {
        user_id: String,
        request: CreateTeamRequest,
        response: Responder<TeamView>,
    },
    AddMember {
        user_id: String,
        team_id: String,
        request: AddMemberRequest,
        response: Responder<TeamView>,
    },
    RemoveMember {
        user_id: String,
        team_id: String,
        member_id: String,
        response: Responder<TeamView>,
    },
}

#[derive(Clone)]
pub struct TeamRequestHandler {
    repository: TeamRepository,
    users: UserRepository,
}

fn team_not_found() -> ServiceError {
    ServiceError::NotFound("Team not found".to_string())
}

/// Creator first, then the requested members in order, without repeats.
fn initial_members(creator: &str, requested: Vec<String>) -> Vec<String> {
    let mut members = vec![creator.to_string()];
    for member in requested {
        let member = member.trim().to_string();
        if !member.is_empty() && !members.contains(&member) {
            members.push(member);
        }
    }
    members
}

impl TeamRequestHandler {
    pub fn new(sql_conn: PgPool) -> Self {
        let repository = TeamRepository::new(sql_conn.clone());
        let users = UserRepository::new(sql_conn);

        TeamRequestHandler { repository, users }
    }

    async fn views(&self, teams: Vec<Team>) -> Result<Vec<TeamView>, ServiceError> {
        let mut ids: Vec<String> = teams
            .iter()
            .flat_map(|team| team.members.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();

        let users: HashMap<String, UserSummary> = self
            .users
            .get_summaries(&ids)
            .await
            .map_err(ServiceError::database)?
            .into_iter()
            .map(|summary| (summary.id.clone(), summary))
            .collect();

        Ok(teams
            .into_iter()
            .map(|team| {
                let member_details = team
                    .members
                    .iter()
                    .filter_map(|id| users.get(id).cloned())
                    .collect();
                TeamView {
                    team,
                    member_details,
                }
            })
            .collect())
    }

    async fn view(&self, team: Team) -> Result<TeamView, ServiceError> {
        self.views(vec![team])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::Internal("team view missing".to_string()))
    }

    async fn team(&self, team_id: &str) -> Result<Team, ServiceError> {
        self.repository
            .get_team(team_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(team_not_found)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<TeamView>, ServiceError> {
        let teams = self
            .repository
            .get_teams_for_member(user_id)
            .await
            .map_err(ServiceError::database)?;

        self.views(teams).await
    }

    async fn create(&self, user_id: &str, request: CreateTeamRequest) -> Result<TeamView, ServiceError> {
        let name = request.validate().map_err(ServiceError::Validation)?;
        let members = initial_members(user_id, request.members);

        let team = self
            .repository
            .insert_team(
                &name,
                request.description.as_deref(),
                user_id,
                &members,
                request.settings,
            )
            .await
            .map_err(ServiceError::database)?;

        log::info!("User {} created team {}.", user_id, team.id);
        self.view(team).await
    }

    async fn add_member(
        &self,
        user_id: &str,
        team_id: &str,
        request: AddMemberRequest,
    ) -> Result<TeamView, ServiceError> {
        let member_id = request
            .member_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::Validation("memberId is required".to_string()))?;

        let team = self.team(team_id).await?;
        if !team.is_member(user_id) {
            return Err(ServiceError::Forbidden(
                "Only team members can add members".to_string(),
            ));
        }
        if self
            .users
            .get_user_by_id(&member_id)
            .await
            .map_err(ServiceError::database)?
            .is_none()
        {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }

        let team = self
            .repository
            .add_member(team_id, &member_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(team_not_found)?;

        self.view(team).await
    }

    /// Admins may remove anyone; everyone else may only leave.
    async fn remove_member(
        &self,
        user_id: &str,
        team_id: &str,
        member_id: &str,
    ) -> Result<TeamView, ServiceError> {
        let team = self.team(team_id).await?;
        if !team.is_admin(user_id) && user_id != member_id {
            return Err(ServiceError::Forbidden(
                "Only team admins can remove other members".to_string(),
            ));
        }
        if !team.is_member(member_id) {
            return Err(ServiceError::NotFound("Member not found in team".to_string()));
        }

        let team = self
            .repository
            .remove_member(team_id, member_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(team_not_found)?;

        self.view(team).await
    }
}

#[async_trait]
impl RequestHandler<TeamRequest> for TeamRequestHandler {
    async fn handle_request(&self, request: TeamRequest) {
        match request {
            TeamRequest::List { user_id, response } => {
                let teams = self.list(&user_id).await;
                let _ = response.send(teams);
            }
            TeamRequest::Create {
                user_id,
                request,
                response,
            } => {
                let team = self.create(&user_id, request).await;
                let _ = response.send(team);
            }
            TeamRequest::AddMember {
                user_id,
                team_id,
                request,
                response,
            } => {
                let team = self.add_member(&user_id, &team_id, request).await;
                let _ = response.send(team);
            }
            TeamRequest::RemoveMember {
                user_id,
                team_id,
                member_id,
                response,
            } => {
                let team = self.remove_member(&user_id, &team_id, &member_id).await;
                let _ = response.send(team);
            }
        }
    }
}

pub struct TeamService;

impl TeamService {
    pub fn new() -> Self {
        TeamService {}
    }
}

#[async_trait]
impl Service<TeamRequest, TeamRequestHandler> for TeamService {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_leads_the_member_list() {
        let members = initial_members(
            "u1",
            vec!["u2".into(), " u1 ".into(), "".into(), "u2".into(), "u3".into()],
        );
        assert_eq!(members, vec!["u1", "u2", "u3"]);
    }
}
