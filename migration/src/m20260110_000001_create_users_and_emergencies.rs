use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create users table
        let create_users_sql = r#"
            CREATE TABLE IF NOT EXISTS resq.users (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                username VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(255) NOT NULL,
                phone_number VARCHAR(32) NOT NULL,
                medical JSONB,
                skills JSONB,
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                latest_login_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#;

        manager
            .get_connection()
            .execute_unprepared(create_users_sql)
            .await?;

        manager
            .get_connection()
            .execute_unprepared("ALTER TABLE resq.users OWNER TO resq")
            .await?;

        // Create emergencies table
        let create_emergencies_sql = r#"
            CREATE TABLE IF NOT EXISTS resq.emergencies (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL
                    REFERENCES resq.users(id) ON DELETE CASCADE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                latitude DOUBLE PRECISION NOT NULL,
                longitude DOUBLE PRECISION NOT NULL,
                image TEXT,
                ai_assessment JSONB,
                aed_snapshot JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#;

        manager
            .get_connection()
            .execute_unprepared(create_emergencies_sql)
            .await?;

        manager
            .get_connection()
            .execute_unprepared("ALTER TABLE resq.emergencies OWNER TO resq")
            .await?;

        // The dispatch hot path asks one question constantly: "which active
        // emergencies does this user own?"
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS emergencies_active_by_user_idx
                 ON resq.emergencies (user_id) WHERE is_active",
            )
            .await?;

        // Resync scans all active rows.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS emergencies_active_idx
                 ON resq.emergencies (is_active) WHERE is_active",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS resq.emergencies")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS resq.users")
            .await?;

        Ok(())
    }
}
