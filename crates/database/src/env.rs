use std::env;

use somnia_common::EnvVars;

pub struct MongoDbEnv {
    pub mongodb_uri: String,
    pub mongodb_db_name: String,
}

impl EnvVars for MongoDbEnv {
    fn load() -> Self {
        Self {
            mongodb_uri: env::var("MONGODB_URI").unwrap(),
            mongodb_db_name: env::var("MONGODB_DB_NAME").unwrap_or_else(|_| "somnia".to_string()),
        }
    }

    fn get_env_var(&self, key: &str) -> String {
        match key {
            "MONGODB_URI" => self.mongodb_uri.clone(),
            "MONGODB_DB_NAME" => self.mongodb_db_name.clone(),
            _ => panic!("Invalid environment variable: {}", key),
        }
    }
}
