use mutethread_core::db::open_db_in_memory;
use mutethread_core::{import_paths, IngestError, MessageStore, RepoError, SqliteMessageStore};
use std::fs;
use std::path::Path;

const ROOT: &str = "Message-ID: <root@example.com>\r\n\
From: Alice <alice@example.com>\r\n\
To: list@example.com\r\n\
Cc: Me <me@example.com>\r\n\
Subject: Planning\r\n\
Date: Tue, 1 Oct 2024 09:00:00 +0000\r\n\
\r\n\
Agenda attached.\r\n";

const REPLY: &str = "Message-ID: <reply@example.com>\r\n\
From: Bob <bob@example.com>\r\n\
To: list@example.com\r\n\
Subject: Re: Planning\r\n\
In-Reply-To: <root@example.com>\r\n\
References: <root@example.com>\r\n\
Date: Tue, 1 Oct 2024 10:00:00 +0000\r\n\
\r\n\
Sounds good.\r\n";

const JUNK: &str = "From: nobody@example.com\r\n\
Subject: no id\r\n\
\r\n\
body\r\n";

fn hidden(id: &str) -> String {
    format!("Message-ID: <{id}>\r\nSubject: hidden\r\n\r\nbody\r\n")
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn import_threads_messages_and_skips_junk() {
    let dir = tempfile::tempdir().unwrap();
    let cur = dir.path().join("cur");
    let tmp = dir.path().join("tmp");
    fs::create_dir_all(&cur).unwrap();
    fs::create_dir_all(&tmp).unwrap();
    write(&cur, "1-reply.eml", REPLY);
    write(&cur, "2-root.eml", ROOT);
    write(&cur, "3-junk.eml", JUNK);
    write(&cur, ".dotfile.eml", &hidden("dot@example.com"));
    write(&tmp, "partial.eml", &hidden("partial@example.com"));

    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();
    let report = import_paths(&store, &[dir.path().to_path_buf()], &["inbox".to_string()]).unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.imported, 2);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, cur.join("3-junk.eml"));
    assert_eq!(store.count_messages().unwrap(), 2);
    assert!(store.find_by_message_id("dot@example.com").unwrap().is_none());
    assert!(store.find_by_message_id("partial@example.com").unwrap().is_none());

    let root = store.find_by_message_id("root@example.com").unwrap().unwrap();
    let reply = store.find_by_message_id("reply@example.com").unwrap().unwrap();
    assert_eq!(store.replies(root).unwrap(), vec![reply]);
    assert_eq!(store.search_roots(store.query("*").unwrap()).unwrap(), vec![root]);

    assert!(store.tags(root).unwrap().contains("inbox"));
    assert!(store.tags(reply).unwrap().contains("inbox"));
    assert_eq!(store.header(root, "cc").unwrap(), "Me <me@example.com>");
    assert_eq!(store.header(reply, "Subject").unwrap(), "Re: Planning");
}

#[test]
fn reimport_counts_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "root.eml", ROOT);
    write(dir.path(), "reply.eml", REPLY);

    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();
    let paths = [dir.path().to_path_buf()];
    import_paths(&store, &paths, &[]).unwrap();

    let second = import_paths(&store, &paths, &[]).unwrap();
    assert_eq!(second.scanned, 2);
    assert_eq!(second.imported, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(store.count_messages().unwrap(), 2);
}

#[test]
fn single_file_path_is_imported() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "root.eml", ROOT);

    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();
    let report = import_paths(&store, &[dir.path().join("root.eml")], &[]).unwrap();

    assert_eq!(report.imported, 1);
    assert!(store.find_by_message_id("root@example.com").unwrap().is_some());
}

#[test]
fn missing_path_and_blank_tag_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let err = import_paths(&store, &[dir.path().join("absent")], &[]).unwrap_err();
    assert!(matches!(err, IngestError::Io { .. }));

    let err = import_paths(&store, &[dir.path().to_path_buf()], &[" ".to_string()]).unwrap_err();
    assert!(matches!(err, IngestError::Repo(RepoError::InvalidTag(_))));
}
