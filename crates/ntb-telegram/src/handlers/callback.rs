use ntb_core::{
    domain::TaskId,
    formatting::callbacks,
    gateway::Action,
    tasks::{NewTask, TaskFilter, TaskStatus},
};

/// Map inline-keyboard callback data to an action.
pub(crate) fn parse_action(data: &str) -> Option<Action> {
    match data {
        callbacks::TASKS => Some(Action::ListTasks(TaskFilter::all())),
        callbacks::IN_PROGRESS => Some(Action::ListTasks(TaskFilter::with_status(
            TaskStatus::InProgress,
        ))),
        callbacks::COMPLETED => Some(Action::ListTasks(TaskFilter::with_status(
            TaskStatus::Completed,
        ))),
        // An untitled task makes the gateway answer with the `/new` usage hint.
        callbacks::NEW_TASK => Some(Action::CreateTask(NewTask::default())),
        callbacks::HELP => Some(Action::Help),
        other => parse_set_status(other),
    }
}

/// `st:{task_id}:{status_code}`
fn parse_set_status(data: &str) -> Option<Action> {
    let rest = data.strip_prefix(callbacks::SET_STATUS_PREFIX)?;
    let (id, code) = rest.rsplit_once(':')?;
    if id.is_empty() {
        return None;
    }
    Some(Action::SetStatus {
        id: TaskId(id.to_string()),
        status: TaskStatus::from_code(code)?,
    })
}

#[cfg(test)]
mod tests {
    use ntb_core::formatting::set_status_callback;

    use super::*;

    #[test]
    fn menu_buttons_map_to_lists() {
        assert_eq!(
            parse_action("in_progress"),
            Some(Action::ListTasks(TaskFilter::with_status(TaskStatus::InProgress)))
        );
        assert_eq!(parse_action("tasks"), Some(Action::ListTasks(TaskFilter::all())));
        assert_eq!(
            parse_action("new_task"),
            Some(Action::CreateTask(NewTask::default()))
        );
    }

    #[test]
    fn status_callback_round_trips() {
        let id = "59833787-2cf9-4fdf-8782-e53db20768a5";
        let data = set_status_callback(id, &TaskStatus::Completed);
        assert!(data.len() <= 64);
        assert_eq!(
            parse_action(&data),
            Some(Action::SetStatus {
                id: TaskId(id.to_string()),
                status: TaskStatus::Completed,
            })
        );
    }

    #[test]
    fn malformed_callbacks_are_ignored() {
        assert_eq!(parse_action("st::done"), None);
        assert_eq!(parse_action("st:abc:bogus"), None);
        assert_eq!(parse_action("askuser:1:2"), None);
    }
}
