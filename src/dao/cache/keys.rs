//! Key namespace used in the ephemeral store. One live session is addressed by its access code.

/// Hash of `userId -> participant JSON`.
pub fn participants(code: &str) -> String {
    format!("session:participants:{code}")
}

/// Hash of `userId -> connectionId` holding the last known active connection.
pub fn user_to_connection(code: &str) -> String {
    format!("session:userToConnection:{code}")
}

/// Hash of `connectionId -> userId`.
pub fn connection_to_user(code: &str) -> String {
    format!("session:connectionToUser:{code}")
}

/// JSON blob with status, question index, timer and question definitions.
pub fn state(code: &str) -> String {
    format!("session:state:{code}")
}

/// Hash of projection toggles.
pub fn projection(code: &str) -> String {
    format!("session:projection:{code}")
}

/// JSON list of user ids in join order.
pub fn join_order(code: &str) -> String {
    format!("session:joinOrder:{code}")
}

/// JSON of the student-visible leaderboard snapshot.
pub fn leaderboard_snapshot(code: &str) -> String {
    format!("session:leaderboardSnapshot:{code}")
}

/// Hash of `userId -> answer JSON` for one question. Deferred attempts are namespaced.
pub fn answers(code: &str, question_uid: &str, attempt: Option<u32>) -> String {
    match attempt {
        Some(attempt) => format!("session:answers:{code}:{question_uid}:{attempt}"),
        None => format!("session:answers:{code}:{question_uid}"),
    }
}

/// JSON blob of a practice session.
pub fn practice(session_id: &str) -> String {
    format!("practice:{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_access_code() {
        assert_eq!(participants("ABC123"), "session:participants:ABC123");
        assert_eq!(user_to_connection("ABC123"), "session:userToConnection:ABC123");
        assert_eq!(connection_to_user("ABC123"), "session:connectionToUser:ABC123");
        assert_eq!(projection("X"), "session:projection:X");
        assert_ne!(projection("X"), projection("Y"));
    }

    #[test]
    fn deferred_answers_include_attempt() {
        assert_eq!(answers("C", "q1", None), "session:answers:C:q1");
        assert_eq!(answers("C", "q1", Some(2)), "session:answers:C:q1:2");
    }
}
