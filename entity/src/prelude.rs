pub use super::emergencies::Entity as Emergencies;
pub use super::users::Entity as Users;
