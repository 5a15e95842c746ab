use ntb_core::{
    domain::UserId,
    gateway::Action,
    tasks::{NewTask, TaskFilter},
};

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn parse_user_id(arg: &str) -> Option<UserId> {
    arg.split_whitespace()
        .next()?
        .parse::<i64>()
        .ok()
        .map(UserId)
}

/// Map a slash command to an action. Unknown commands get the help text.
pub(crate) fn parse_action(text: &str) -> Option<Action> {
    let (cmd, arg) = parse_command(text);

    let action = match cmd.as_str() {
        "start" => Action::Start,
        "help" => Action::Help,
        "cancel" => Action::Cancel,
        "tasks" => Action::ListTasks(TaskFilter::all()),
        "new" => Action::CreateTask(NewTask::titled(arg)),
        "allow" => Action::AllowUser(parse_user_id(&arg)?),
        "deny" => Action::DenyUser(parse_user_id(&arg)?),
        "stats" => Action::Stats,
        _ => Action::Help,
    };
    Some(action)
}
