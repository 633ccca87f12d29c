//! Dispatcher schema and reply delivery

use keydropcore::requests::{self, Reply};
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{Document, InputFile};

use super::types::{sender_id, HandlerDeps, HandlerError};
use crate::telegram::bot::Command;
use crate::telegram::menu::resource_keyboard;
use crate::telegram::notifications::broadcast;

/// Largest restock upload accepted, in bytes
const MAX_UPLOAD_BYTES: u32 = 20 * 1024 * 1024;

/// Creates the main dispatcher schema for the bot
///
/// Branch order matters: restock uploads carry their command in the
/// caption, so they are matched before plain commands.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(restock_upload_handler(deps.clone()))
        .branch(command_handler(deps.clone()))
        .branch(unknown_command_handler())
        .branch(callback_handler(deps))
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                let Some(user_id) = sender_id(msg.from.as_ref()) else {
                    return Ok(());
                };
                let (name, args) = cmd.parts();
                log::info!("/{} from user {}", name, user_id);

                let reply = match requests::Request::from_command(name, args) {
                    Ok(request) => deps.router.handle(user_id, request).await,
                    Err(e) => Reply::text(e.to_string()),
                };
                deliver(&bot, msg.chat.id, reply).await
            }
        },
    ))
}

/// Anything that looks like a command but did not parse.
fn unknown_command_handler() -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some_and(|t| t.starts_with('/')))
        .endpoint(|bot: Bot, msg: Message| async move {
            bot.send_message(msg.chat.id, "Unknown command. Send /help for the list.")
                .await?;
            Ok::<(), HandlerError>(())
        })
}

fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            let request = q.data.as_deref().and_then(requests::Request::from_callback);
            let Some(request) = request else {
                bot.answer_callback_query(q.id.clone()).text("Unknown option").await?;
                return Ok(());
            };
            bot.answer_callback_query(q.id.clone()).await?;

            let Some(user_id) = sender_id(Some(&q.from)) else {
                return Ok(());
            };
            log::info!("callback {} from user {}", request.name(), user_id);

            let reply = deps.router.handle(user_id, request).await;
            deliver(&bot, ChatId::from(q.from.id), reply).await
        }
    })
}

fn restock_caption(msg: &Message) -> Option<&str> {
    msg.caption().and_then(parse_restock_caption)
}

/// Resource named by a `/restock <resource>` caption, `""` when missing.
fn parse_restock_caption(caption: &str) -> Option<&str> {
    let caption = caption.trim();
    let rest = caption.strip_prefix("/restock")?;
    if let Some(with_mention) = rest.strip_prefix('@') {
        return Some(with_mention.split_once(char::is_whitespace).map_or("", |(_, r)| r.trim()));
    }
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn restock_upload_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.document().is_some() && restock_caption(&msg).is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let Some(user_id) = sender_id(msg.from.as_ref()) else {
                    return Ok(());
                };
                // Gate before downloading anything
                if !deps.router.is_admin(user_id) {
                    bot.send_message(msg.chat.id, "This command is for admins only.").await?;
                    return Ok(());
                }
                let (Some(doc), Some(resource)) = (msg.document(), restock_caption(&msg)) else {
                    return Ok(());
                };

                let content = match download_document(&bot, doc).await {
                    Ok(content) => content,
                    Err(e) => {
                        log::error!("Restock upload from {} failed: {}", user_id, e);
                        bot.send_message(msg.chat.id, format!("Could not read the upload: {}", e))
                            .await?;
                        return Ok(());
                    }
                };

                let args = format!("{}\n{}", resource, content);
                let reply = match requests::Request::from_command("restock", &args) {
                    Ok(request) => deps.router.handle(user_id, request).await,
                    Err(e) => Reply::text(e.to_string()),
                };
                deliver(&bot, msg.chat.id, reply).await
            }
        })
}

/// Downloads a Telegram document into memory as text.
async fn download_document(bot: &Bot, doc: &Document) -> Result<String, HandlerError> {
    if doc.file.size > MAX_UPLOAD_BYTES {
        return Err(format!("file is larger than {} MB", MAX_UPLOAD_BYTES / 1024 / 1024).into());
    }

    let file = bot.get_file(doc.file.id.clone()).await?;
    let mut buffer: Vec<u8> = Vec::new();
    bot.download_file(&file.path, &mut buffer).await?;

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Sends a router reply to `chat_id`.
pub async fn deliver(bot: &Bot, chat_id: ChatId, reply: Reply) -> Result<(), HandlerError> {
    match reply {
        Reply::Text(text) => {
            bot.send_message(chat_id, text).await?;
        }
        Reply::Menu { text, options } => {
            if options.is_empty() {
                bot.send_message(chat_id, text).await?;
            } else {
                bot.send_message(chat_id, text)
                    .reply_markup(resource_keyboard(&options))
                    .await?;
            }
        }
        Reply::Document {
            file_name,
            bytes,
            caption,
        } => {
            bot.send_document(chat_id, InputFile::memory(bytes).file_name(file_name))
                .caption(caption)
                .await?;
        }
        Reply::Broadcast { recipients, text } => {
            let report = broadcast(bot, &recipients, &text).await;
            bot.send_message(chat_id, report.to_string()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_restock_caption() {
        assert_eq!(parse_restock_caption("/restock codm"), Some("codm"));
        assert_eq!(parse_restock_caption("  /restock   gmail "), Some("gmail"));
        assert_eq!(parse_restock_caption("/restock@keydrop_bot codm"), Some("codm"));
        assert_eq!(parse_restock_caption("/restock"), Some(""));
    }

    #[test]
    fn test_other_captions_are_ignored() {
        assert_eq!(parse_restock_caption("/restocking codm"), None);
        assert_eq!(parse_restock_caption("new lines for codm"), None);
        assert_eq!(parse_restock_caption(""), None);
    }
}
