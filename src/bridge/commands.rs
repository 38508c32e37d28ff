//! Chat commands shared by both adapters.
//!
//! Adapters detect commands in incoming text with [`Command::parse`], run
//! them with [`execute`], then send the returned replies. Commands never
//! reach the transport queues.
//!
//! | Command          | Who    | Effect                                         |
//! |------------------|--------|------------------------------------------------|
//! | `start`, `help`  | anyone | usage text                                     |
//! | `connect`        | anyone | link to the hub chat (or request moderation)   |
//! | `disconnect`     | anyone | unlink from the hub chat                       |
//! | `nickname <n>`   | anyone | set the nickname shown on relayed messages     |
//! | `ban <id..>`     | admin  | ban chats and drop their links                 |
//! | `unban <id..>`   | admin  | lift bans                                      |
//! | `users`          | admin  | chats linked to the hub                        |
//! | `on_moderation`  | admin  | chats waiting for approval                     |
//! | `approve <id..>` | admin  | approve pending chats and link them            |
//! | `nicknames`      | admin  | every stored nickname                          |

use tracing::{error, info};

use crate::routing::{ChatEntry, RoutingStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Connect,
    Disconnect,
    Nickname(String),
    Ban(Vec<String>),
    Unban(Vec<String>),
    Users,
    OnModeration,
    Approve(Vec<String>),
    Nicknames,
}

impl Command {
    /// Parse `text` as a command introduced by `prefix`.
    ///
    /// Telegram-style `@botname` suffixes on the command word are ignored.
    /// Returns `None` for ordinary text and unknown commands.
    pub fn parse(text: &str, prefix: char) -> Option<Command> {
        let rest = text.trim().strip_prefix(prefix)?;
        let mut words = rest.split_whitespace();
        let head = words.next()?;
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let args: Vec<String> = words.map(str::to_string).collect();

        let command = match name.as_str() {
            "start" | "help" => Command::Help,
            "connect" => Command::Connect,
            "disconnect" => Command::Disconnect,
            "nickname" => Command::Nickname(args.join(" ")),
            "ban" => Command::Ban(args),
            "unban" => Command::Unban(args),
            "users" => Command::Users,
            "on_moderation" => Command::OnModeration,
            "approve" => Command::Approve(args),
            "nicknames" => Command::Nicknames,
            _ => return None,
        };
        Some(command)
    }

    /// Commands reserved for admin chats.
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Command::Ban(_)
                | Command::Unban(_)
                | Command::Users
                | Command::OnModeration
                | Command::Approve(_)
                | Command::Nicknames
        )
    }
}

/// Adapter settings a command runs against.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub store: &'a RoutingStore,
    /// Chat that user chats are linked to.
    pub hub_chat: &'a str,
    /// Users allowed to run admin commands.
    pub admin_chats: &'a [String],
    /// Whether `connect` needs admin approval.
    pub moderation: bool,
    pub prefix: char,
}

/// Messages an adapter sends after running a command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Replies to the chat the command came from.
    pub replies: Vec<String>,
    /// Text for every admin chat.
    pub notify_admins: Option<String>,
    /// Texts for specific chats, as `(chat_id, text)`.
    pub notify_chats: Vec<(String, String)>,
}

impl CommandOutcome {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            replies: vec![text.into()],
            ..Default::default()
        }
    }
}

/// Run `command` sent in `chat_id` by user `sender_id`.
///
/// Admin commands from non-admins produce an empty outcome.
pub fn execute(
    ctx: &CommandContext<'_>,
    chat_id: &str,
    sender_id: &str,
    command: Command,
) -> CommandOutcome {
    if command.is_admin_only() && !ctx.admin_chats.iter().any(|admin| admin == sender_id) {
        info!(chat_id, sender_id, ?command, "Ignoring admin command from non-admin");
        return CommandOutcome::default();
    }

    match command {
        Command::Help => CommandOutcome::reply(help_text(ctx.prefix)),
        Command::Connect => connect(ctx, chat_id),
        Command::Disconnect => match ctx.store.disconnect(chat_id, ctx.hub_chat) {
            Ok(()) => CommandOutcome::reply("Disconnected"),
            Err(e) => failed("disconnect", chat_id, e),
        },
        Command::Nickname(name) => {
            let name = name.trim();
            if name.is_empty() {
                return CommandOutcome::reply("Not enough arguments");
            }
            match ctx.store.set_nickname(chat_id, name) {
                Ok(()) => CommandOutcome::reply(format!("Nickname set: {}", name)),
                Err(e) => failed("nickname", chat_id, e),
            }
        }
        Command::Ban(ids) => for_each_id(&ids, |id| ctx.store.ban(id), "banned"),
        Command::Unban(ids) => for_each_id(&ids, |id| ctx.store.unban(id), "unbanned"),
        Command::Users => CommandOutcome::reply(format_entries(
            &ctx.store.list_connected(ctx.hub_chat),
            "No connected users",
        )),
        Command::OnModeration => CommandOutcome::reply(format_entries(
            &ctx.store.list_pending(),
            "Nobody is waiting for moderation",
        )),
        Command::Approve(ids) => {
            let mut outcome = for_each_id(
                &ids,
                |id| ctx.store.approve(id, ctx.hub_chat),
                "approved",
            );
            for id in &ids {
                if ctx.store.recipients(id).contains(ctx.hub_chat) {
                    outcome
                        .notify_chats
                        .push((id.clone(), "Your request was approved, you are connected".into()));
                }
            }
            outcome
        }
        Command::Nicknames => CommandOutcome::reply(format_entries(
            &ctx.store.list_nicknames(),
            "No nicknames set",
        )),
    }
}

fn connect(ctx: &CommandContext<'_>, chat_id: &str) -> CommandOutcome {
    if ctx.store.is_banned(chat_id) {
        return CommandOutcome::reply("You are banned");
    }

    if ctx.moderation && !ctx.store.is_moderated(chat_id) {
        if ctx.store.is_pending(chat_id) {
            return CommandOutcome::reply("Your request is still waiting for moderation");
        }
        return match ctx.store.moderate(chat_id) {
            Ok(()) => {
                info!(chat_id, "Connection request queued for moderation");
                CommandOutcome {
                    replies: vec!["Your request was sent for moderation".into()],
                    notify_admins: Some(format!(
                        "Chat {} wants to connect. Approve with {}approve {}",
                        chat_id, ctx.prefix, chat_id
                    )),
                    notify_chats: Vec::new(),
                }
            }
            Err(e) => failed("moderate", chat_id, e),
        };
    }

    match ctx.store.connect(chat_id, ctx.hub_chat) {
        Ok(()) => CommandOutcome::reply("Connected"),
        Err(e) => failed("connect", chat_id, e),
    }
}

fn for_each_id<F>(ids: &[String], mut operation: F, done: &str) -> CommandOutcome
where
    F: FnMut(&str) -> crate::common::error::StoreResult<()>,
{
    if ids.is_empty() {
        return CommandOutcome::reply("Not enough arguments");
    }

    let lines: Vec<String> = ids
        .iter()
        .map(|id| match operation(id) {
            Ok(()) => format!("{} {}", id, done),
            Err(e) => {
                error!(chat_id = %id, "Command failed: {}", e);
                format!("{} failed: {}", id, e)
            }
        })
        .collect();
    CommandOutcome::reply(lines.join("\n"))
}

fn failed(action: &str, chat_id: &str, e: impl std::fmt::Display) -> CommandOutcome {
    error!(chat_id, action, "Command failed: {}", e);
    CommandOutcome::reply(format!("Failed to {}: {}", action, e))
}

fn format_entries(entries: &[ChatEntry], empty: &str) -> String {
    if entries.is_empty() {
        return empty.to_string();
    }
    entries
        .iter()
        .map(|entry| format!("{} - {}", entry.chat_id, entry.nickname))
        .collect::<Vec<_>>()
        .join("\n")
}

fn help_text(prefix: char) -> String {
    format!(
        "Set the name others will see with {p}nickname <name>\n\
         Join the conversation with {p}connect, leave with {p}disconnect",
        p = prefix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUB: &str = "hub";

    fn admins() -> Vec<String> {
        vec!["admin".to_string()]
    }

    fn ctx<'a>(store: &'a RoutingStore, admins: &'a [String], moderation: bool) -> CommandContext<'a> {
        CommandContext {
            store,
            hub_chat: HUB,
            admin_chats: admins,
            moderation,
            prefix: '/',
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("/connect", '/'), Some(Command::Connect));
        assert_eq!(Command::parse("/start@relay_bot", '/'), Some(Command::Help));
        assert_eq!(Command::parse("  !HELP ", '!'), Some(Command::Help));
        assert_eq!(
            Command::parse("/nickname Big Bob", '/'),
            Some(Command::Nickname("Big Bob".into()))
        );
        assert_eq!(
            Command::parse("!ban 1 2", '!'),
            Some(Command::Ban(vec!["1".into(), "2".into()]))
        );
        assert_eq!(Command::parse("/unknown", '/'), None);
        assert_eq!(Command::parse("hello /connect", '/'), None);
        assert_eq!(Command::parse("!connect", '/'), None);
        assert_eq!(Command::parse("/", '/'), None);
    }

    #[test]
    fn test_connect_without_moderation_links_to_hub() {
        let store = RoutingStore::in_memory();
        let admins = admins();
        let out = execute(&ctx(&store, &admins, false), "u1", "u1", Command::Connect);

        assert_eq!(out.replies, vec!["Connected"]);
        assert!(store.recipients("u1").contains(HUB));
        assert!(store.recipients(HUB).contains("u1"));

        execute(&ctx(&store, &admins, false), "u1", "u1", Command::Disconnect);
        assert!(store.recipients("u1").is_empty());
    }

    #[test]
    fn test_moderation_flow() {
        let store = RoutingStore::in_memory();
        let admins = admins();
        let ctx = ctx(&store, &admins, true);

        let out = execute(&ctx, "u1", "u1", Command::Connect);
        assert!(store.is_pending("u1"));
        assert!(store.recipients("u1").is_empty());
        assert!(out.notify_admins.unwrap().contains("/approve u1"));

        let again = execute(&ctx, "u1", "u1", Command::Connect);
        assert!(again.notify_admins.is_none());

        let pending = execute(&ctx, "admin", "admin", Command::OnModeration);
        assert_eq!(pending.replies, vec!["u1 - no nick"]);

        let approved = execute(&ctx, "admin", "admin", Command::Approve(vec!["u1".into()]));
        assert_eq!(approved.replies, vec!["u1 approved"]);
        assert_eq!(approved.notify_chats.len(), 1);
        assert!(store.recipients("u1").contains(HUB));
        assert!(store.is_moderated("u1"));

        // Approved chats reconnect without another review
        execute(&ctx, "u1", "u1", Command::Disconnect);
        let reconnect = execute(&ctx, "u1", "u1", Command::Connect);
        assert_eq!(reconnect.replies, vec!["Connected"]);
    }

    #[test]
    fn test_admin_commands_ignored_for_others() {
        let store = RoutingStore::in_memory();
        let admins = admins();
        let out = execute(&ctx(&store, &admins, false), "u1", "u1", Command::Ban(vec!["u2".into()]));

        assert_eq!(out, CommandOutcome::default());
        assert!(!store.is_banned("u2"));
    }

    #[test]
    fn test_ban_blocks_connect() {
        let store = RoutingStore::in_memory();
        let admins = admins();
        let ctx = ctx(&store, &admins, false);
        execute(&ctx, "u1", "u1", Command::Connect);

        let out = execute(&ctx, "admin", "admin", Command::Ban(vec!["u1".into()]));
        assert_eq!(out.replies, vec!["u1 banned"]);
        assert!(store.recipients(HUB).is_empty());

        let refused = execute(&ctx, "u1", "u1", Command::Connect);
        assert_eq!(refused.replies, vec!["You are banned"]);

        execute(&ctx, "admin", "admin", Command::Unban(vec!["u1".into()]));
        let out = execute(&ctx, "u1", "u1", Command::Connect);
        assert_eq!(out.replies, vec!["Connected"]);
    }

    #[test]
    fn test_nickname_and_listings() {
        let store = RoutingStore::in_memory();
        let admins = admins();
        let ctx = ctx(&store, &admins, false);

        let empty = execute(&ctx, "u1", "u1", Command::Nickname("  ".into()));
        assert_eq!(empty.replies, vec!["Not enough arguments"]);

        execute(&ctx, "u1", "u1", Command::Nickname("Alice".into()));
        execute(&ctx, "u1", "u1", Command::Connect);
        execute(&ctx, "u2", "u2", Command::Connect);

        let users = execute(&ctx, "admin", "admin", Command::Users);
        assert_eq!(users.replies, vec!["u1 - Alice\nu2 - no nick"]);

        let nicks = execute(&ctx, "admin", "admin", Command::Nicknames);
        assert_eq!(nicks.replies, vec!["u1 - Alice"]);

        let no_args = execute(&ctx, "admin", "admin", Command::Approve(Vec::new()));
        assert_eq!(no_args.replies, vec!["Not enough arguments"]);
    }
}
