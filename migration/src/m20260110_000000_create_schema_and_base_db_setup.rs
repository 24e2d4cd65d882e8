use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create the platform's schema
        manager
            .get_connection()
            .execute_unprepared("CREATE SCHEMA IF NOT EXISTS resq;")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("SET search_path TO resq, public;")
            .await?;

        // Grant the platform's DB user everything it needs inside the schema
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DO $$ BEGIN
                    GRANT ALL PRIVILEGES ON DATABASE resq TO resq;
                    GRANT ALL ON SCHEMA resq TO resq;

                    ALTER DEFAULT PRIVILEGES IN SCHEMA resq GRANT ALL ON TABLES TO resq;
                    ALTER DEFAULT PRIVILEGES IN SCHEMA resq GRANT ALL ON SEQUENCES TO resq;
                    ALTER DEFAULT PRIVILEGES IN SCHEMA resq GRANT ALL ON FUNCTIONS TO resq;
                END $$;
            "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Revoke default privileges first
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DO $$ BEGIN
                    ALTER DEFAULT PRIVILEGES IN SCHEMA resq REVOKE ALL ON FUNCTIONS FROM resq;
                    ALTER DEFAULT PRIVILEGES IN SCHEMA resq REVOKE ALL ON SEQUENCES FROM resq;
                    ALTER DEFAULT PRIVILEGES IN SCHEMA resq REVOKE ALL ON TABLES FROM resq;
                    REVOKE ALL ON SCHEMA resq FROM resq;
                    REVOKE ALL PRIVILEGES ON DATABASE resq FROM resq;
                END $$;
            "#,
            )
            .await?;

        // Drop the schema (CASCADE will remove all objects in it)
        manager
            .get_connection()
            .execute_unprepared("DROP SCHEMA IF EXISTS resq CASCADE;")
            .await?;

        Ok(())
    }
}
