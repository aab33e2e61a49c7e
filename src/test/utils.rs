#[cfg(test)]
pub mod test_db {
    use crate::api::Api;
    use crate::auth::{AuthContext, NewUser, Role};
    use crate::db::{activate_test, add_question_to_test, create_question, create_test, create_user};
    use crate::error::AppError;
    use crate::models::{NewQuestion, NewTest};
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;
    use std::time::Duration;
    use tempfile::TempDir;

    static INIT: Once = Once::new();
    pub const DEFAULT_COURSE_ID: i64 = 1;

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        questions: Vec<TestQuestion>,
        tests: Vec<TestTest>,
        file_connections: Option<u32>,
    }

    pub struct TestUser {
        pub name: String,
        pub roles: Vec<Role>,
    }

    pub struct TestQuestion {
        pub title: String,
        pub author: String,
        pub correct_option: i64,
        pub points: i64,
    }

    pub struct TestTest {
        pub title: String,
        pub teacher: String,
        pub questions: Vec<String>,
        pub active: bool,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn student(self, name: &str) -> Self {
            self.user_with_roles(name, &[Role::Student])
        }

        pub fn teacher(self, name: &str) -> Self {
            self.user_with_roles(name, &[Role::Teacher])
        }

        pub fn admin(self, name: &str) -> Self {
            self.user_with_roles(name, &[Role::Admin])
        }

        pub fn user_with_roles(mut self, name: &str, roles: &[Role]) -> Self {
            self.users.push(TestUser {
                name: name.to_string(),
                roles: roles.to_vec(),
            });
            self
        }

        /// Options are always `["A", "B"]`.
        pub fn question(mut self, title: &str, author: &str, correct_option: i64, points: i64) -> Self {
            self.questions.push(TestQuestion {
                title: title.to_string(),
                author: author.to_string(),
                correct_option,
                points,
            });
            self
        }

        /// Backs the database with a WAL file in a temp dir and a pool of
        /// `connections`, so concurrent callers really race.
        pub fn file_backed(mut self, connections: u32) -> Self {
            self.file_connections = Some(connections);
            self
        }

        /// An inactive test linking `questions` in the given order.
        pub fn test(mut self, title: &str, teacher: &str, questions: &[&str]) -> Self {
            self.tests.push(TestTest {
                title: title.to_string(),
                teacher: teacher.to_string(),
                questions: questions.iter().map(|q| q.to_string()).collect(),
                active: false,
            });
            self
        }

        pub fn active_test(mut self, title: &str, teacher: &str, questions: &[&str]) -> Self {
            self.tests.push(TestTest {
                title: title.to_string(),
                teacher: teacher.to_string(),
                questions: questions.iter().map(|q| q.to_string()).collect(),
                active: true,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder().is_test(true).try_init();
            });

            let (pool, dir) = match self.file_connections {
                Some(connections) => {
                    let dir = TempDir::new().map_err(|e| {
                        AppError::Internal(format!("Failed to create temp dir: {}", e))
                    })?;
                    let options = SqliteConnectOptions::new()
                        .filename(dir.path().join("quiz.db"))
                        .create_if_missing(true)
                        .journal_mode(SqliteJournalMode::Wal)
                        .busy_timeout(Duration::from_secs(10))
                        .foreign_keys(true);
                    let pool = SqlitePoolOptions::new()
                        .max_connections(connections)
                        .connect_with(options)
                        .await?;
                    (pool, Some(dir))
                }
                None => {
                    // One connection keeps the shared in-memory database alive and
                    // serialises concurrent callers.
                    let pool = SqlitePoolOptions::new()
                        .max_connections(1)
                        .connect("sqlite::memory:")
                        .await?;
                    (pool, None)
                }
            };

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut user_roles_map: HashMap<String, Vec<Role>> = HashMap::new();
            let mut question_id_map: HashMap<String, i64> = HashMap::new();
            let mut test_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let created = create_user(
                    &pool,
                    &NewUser {
                        full_name: user.name.clone(),
                        email: format!("{}@example.com", user.name),
                        roles: user.roles.clone(),
                    },
                )
                .await?;

                user_id_map.insert(user.name.clone(), created.id);
                user_roles_map.insert(user.name.clone(), created.roles);
            }

            for question in &self.questions {
                let author_id = *user_id_map.get(&question.author).ok_or_else(|| {
                    AppError::NotFound(format!("Test user {} not defined", question.author))
                })?;

                let created = create_question(
                    &pool,
                    author_id,
                    &NewQuestion {
                        title: question.title.clone(),
                        text: format!("{}?", question.title),
                        options: vec!["A".to_string(), "B".to_string()],
                        correct_option: question.correct_option,
                        points: question.points,
                    },
                )
                .await?;

                question_id_map.insert(question.title.clone(), created.id);
            }

            for test in &self.tests {
                let teacher_id = *user_id_map.get(&test.teacher).ok_or_else(|| {
                    AppError::NotFound(format!("Test user {} not defined", test.teacher))
                })?;

                let created = create_test(
                    &pool,
                    teacher_id,
                    &NewTest {
                        title: test.title.clone(),
                        description: String::new(),
                        course_id: DEFAULT_COURSE_ID,
                    },
                )
                .await?;

                for title in &test.questions {
                    let question_id = *question_id_map.get(title).ok_or_else(|| {
                        AppError::NotFound(format!("Test question {} not defined", title))
                    })?;
                    add_question_to_test(&pool, created.id, question_id).await?;
                }

                if test.active {
                    activate_test(&pool, created.id).await?;
                }

                test_id_map.insert(test.title.clone(), created.id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                user_roles_map,
                question_id_map,
                test_id_map,
                _dir: dir,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub user_roles_map: HashMap<String, Vec<Role>>,
        pub question_id_map: HashMap<String, i64>,
        pub test_id_map: HashMap<String, i64>,
        // Holds the database file until the test ends.
        _dir: Option<TempDir>,
    }

    impl TestDb {
        pub fn user_id(&self, name: &str) -> Option<i64> {
            self.user_id_map.get(name).copied()
        }

        pub fn question_id(&self, title: &str) -> Option<i64> {
            self.question_id_map.get(title).copied()
        }

        pub fn test_id(&self, title: &str) -> Option<i64> {
            self.test_id_map.get(title).copied()
        }

        /// Claims-style context for a seeded user.
        pub fn auth(&self, name: &str) -> Option<AuthContext> {
            let id = self.user_id(name)?;
            let roles = self.user_roles_map.get(name)?.clone();
            Some(AuthContext::new(id, roles))
        }

        pub fn api(&self) -> Api {
            Api::new(self.pool.clone())
        }
    }
}
