//! User-facing texts and task list rendering (Telegram HTML).

use crate::{
    reply::{InlineButton, InlineKeyboard, Reply},
    tasks::{TaskRecord, TaskStatus},
};

pub const WELCOME: &str = "Привет! Я помогу управлять задачами в Notion.";
pub const NO_TASKS: &str = "Задач не найдено";
pub const TASK_CREATED: &str = "✅ Задача создана";
pub const TASK_UPDATED: &str = "✅ Задача обновлена";
pub const ACCESS_DENIED: &str = "⛔ У вас нет доступа к этому боту. Обратитесь к администратору.";
pub const ADMIN_ONLY: &str = "⛔ Команда доступна только администратору.";
pub const GENERIC_FAILURE: &str = "❌ Произошла ошибка. Попробуйте позже.";
pub const DOWNSTREAM_UNAVAILABLE: &str =
    "⏳ Сервис задач временно недоступен. Попробуйте позже.";
pub const CANCELLED: &str = "❌ Действие отменено";
pub const NEW_TASK_USAGE: &str = "📝 Введите название задачи: <code>/new Название</code>";

pub const HELP: &str = "📚 <b>Доступные команды:</b>\n\n\
/start - Начать работу с ботом\n\
/new &lt;название&gt; - Создать новую задачу\n\
/tasks - Просмотр задач\n\
/help - Показать эту справку\n\
/cancel - Отменить текущее действие\n\n\
<b>Администратор:</b>\n\
/allow &lt;id&gt; - Открыть доступ пользователю\n\
/deny &lt;id&gt; - Закрыть доступ пользователю\n\
/stats - Состояние сессий";

/// Callback payloads of the main menu.
pub mod callbacks {
    pub const TASKS: &str = "tasks";
    pub const NEW_TASK: &str = "new_task";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const HELP: &str = "help";
    /// `st:{task_id}:{status_code}`
    pub const SET_STATUS_PREFIX: &str = "st:";
}

const MAX_TASK_BUTTONS: usize = 10;
const BUTTON_LABEL_MAX_LEN: usize = 30;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn main_menu() -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![
            InlineButton::new("📋 Задачи", callbacks::TASKS),
            InlineButton::new("➕ Новая", callbacks::NEW_TASK),
        ],
        vec![
            InlineButton::new("🔄 В работе", callbacks::IN_PROGRESS),
            InlineButton::new("✅ Готово", callbacks::COMPLETED),
        ],
        vec![InlineButton::new("❓ Помощь", callbacks::HELP)],
    ])
}

pub fn welcome() -> Reply {
    Reply::text(WELCOME).with_keyboard(main_menu())
}

pub fn rate_limited(retry_after_secs: f64) -> String {
    format!(
        "⚠️ Пожалуйста, подождите {:.1} с перед следующим запросом.",
        retry_after_secs.max(0.1)
    )
}

pub fn status_label(status: &TaskStatus) -> String {
    escape_html(status.notion_name())
}

/// `📋 Ваши задачи:` followed by one line per task.
///
/// Open tasks also get a "mark done" button each.
pub fn task_list(tasks: &[TaskRecord]) -> Reply {
    if tasks.is_empty() {
        return Reply::text(NO_TASKS);
    }

    let mut html = String::from("📋 <b>Ваши задачи:</b>\n\n");
    for task in tasks {
        html.push_str(&task_line(task));
        html.push('\n');
    }

    let buttons: Vec<InlineButton> = tasks
        .iter()
        .filter(|t| {
            !matches!(
                t.status,
                Some(TaskStatus::Completed) | Some(TaskStatus::Archived)
            )
        })
        .take(MAX_TASK_BUTTONS)
        .map(|t| {
            InlineButton::new(
                format!("✅ {}", t.title),
                set_status_callback(&t.id.0, &TaskStatus::Completed),
            )
        })
        .collect();

    let reply = Reply::text(html.trim_end().to_string());
    if buttons.is_empty() {
        return reply;
    }
    reply.with_keyboard(InlineKeyboard::one_per_row(buttons, BUTTON_LABEL_MAX_LEN))
}

pub fn task_line(task: &TaskRecord) -> String {
    let mut line = format!("• {}", escape_html(&task.title));
    if let Some(status) = &task.status {
        line.push_str(&format!(" [{}]", status_label(status)));
    }
    if let Some(due) = task.due {
        line.push_str(&format!(" 📅 {}", due.format("%d.%m.%Y")));
    }
    line
}

pub fn task_created(task: &TaskRecord) -> Reply {
    Reply::text(format!("{TASK_CREATED}\n\n{}", task_line(task)))
}

pub fn task_updated(task: &TaskRecord) -> Reply {
    Reply::text(format!("{TASK_UPDATED}\n\n{}", task_line(task)))
}

pub fn set_status_callback(task_id: &str, status: &TaskStatus) -> String {
    format!(
        "{}{}:{}",
        callbacks::SET_STATUS_PREFIX,
        task_id,
        status.code().unwrap_or("todo")
    )
}
