pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod services;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    RepositoryError, SqlApprovalCaseStore, SqlApprovalPolicyStore, SqlApproverDirectory,
    SqlHolidayRepository, SqlWorkflowDefinitionStore, SqlWorkflowStateStore,
};
pub use services::{build_services, Services};
