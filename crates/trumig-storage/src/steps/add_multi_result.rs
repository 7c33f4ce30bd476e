use super::StepError;
use rusqlite::Connection;

pub(super) fn migrate(conn: &Connection) -> Result<(), StepError> {
    conn.execute_batch("ALTER TABLE feedbacks ADD COLUMN multi_result TEXT;")
        .map_err(StepError::sqlite("feedbacks"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{columns, store_at};
    use trumig_core::checkpoints::V0_3_0;

    #[test]
    fn adds_nullable_multi_result_column() {
        let store = store_at(V0_3_0, |conn| {
            conn.execute_batch(
                "INSERT INTO feedbacks VALUES ('rec-1', 'fb-1', 'abc', 'def-1', 1, 'done', NULL, \
                 '{\"calls\": []}', 0.5, 'f', '{}');",
            )
            .expect("seed");
        });
        migrate(store.connection()).expect("migrate");

        assert_eq!(columns(&store, "feedbacks").last().map(String::as_str), Some("multi_result"));
        let value: Option<String> = store
            .connection()
            .query_row(
                "SELECT multi_result FROM feedbacks WHERE feedback_result_id = 'fb-1'",
                [],
                |row| row.get(0),
            )
            .expect("row");
        assert_eq!(value, None);
    }

    #[test]
    fn second_run_fails_on_duplicate_column() {
        let store = store_at(V0_3_0, |_| {});
        migrate(store.connection()).expect("first run");
        let err = migrate(store.connection()).expect_err("duplicate column");
        assert_eq!(err.table(), "feedbacks");
    }
}
