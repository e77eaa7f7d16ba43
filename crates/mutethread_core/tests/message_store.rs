use mutethread_core::db::open_db_in_memory;
use mutethread_core::{MessageId, MessageStore, NewMessage, RepoError, SqliteMessageStore};
use std::collections::BTreeSet;

fn insert(store: &SqliteMessageStore<'_>, message: NewMessage) -> MessageId {
    store.insert_message(&message).unwrap()
}

fn roots(store: &SqliteMessageStore<'_>, query: &str) -> Vec<MessageId> {
    store.search_roots(store.query(query).unwrap()).unwrap()
}

#[test]
fn replies_are_linked_in_date_order() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let root = insert(&store, NewMessage::new("root@x").date(100));
    let late = insert(&store, NewMessage::new("late@x").in_reply_to("root@x").date(300));
    let early = insert(&store, NewMessage::new("early@x").in_reply_to("root@x").date(200));
    let nested = insert(&store, NewMessage::new("nested@x").in_reply_to("early@x").date(400));

    assert_eq!(store.replies(root).unwrap(), vec![early, late]);
    assert_eq!(store.replies(early).unwrap(), vec![nested]);
    assert!(store.replies(nested).unwrap().is_empty());
    assert_eq!(roots(&store, "*"), vec![root]);

    let record = store.get_message(nested).unwrap().unwrap();
    assert_eq!(record.parent, Some(early));
    assert_eq!(record.message_id, "nested@x");
}

#[test]
fn references_are_used_when_in_reply_to_is_unknown() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let root = insert(&store, NewMessage::new("root@x"));
    let mut reply = NewMessage::new("reply@x").in_reply_to("missing@x");
    reply.references = vec!["root@x".to_string(), "also-missing@x".to_string()];
    let reply = insert(&store, reply);

    assert_eq!(store.replies(root).unwrap(), vec![reply]);
}

#[test]
fn reply_imported_before_parent_is_adopted() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let reply = insert(&store, NewMessage::new("reply@x").in_reply_to("root@x").date(200));
    assert_eq!(roots(&store, "*"), vec![reply]);

    let root = insert(&store, NewMessage::new("root@x").date(100));
    assert_eq!(roots(&store, "*"), vec![root]);
    assert_eq!(store.replies(root).unwrap(), vec![reply]);

    let root_record = store.get_message(root).unwrap().unwrap();
    let reply_record = store.get_message(reply).unwrap().unwrap();
    assert_eq!(root_record.thread_id, reply_record.thread_id);
}

#[test]
fn mutual_replies_do_not_form_a_cycle() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let first = insert(&store, NewMessage::new("a@x").in_reply_to("b@x"));
    let second = insert(&store, NewMessage::new("b@x").in_reply_to("a@x"));

    assert_eq!(roots(&store, "*"), vec![first]);
    assert_eq!(store.replies(first).unwrap(), vec![second]);
    assert!(store.replies(second).unwrap().is_empty());
}

#[test]
fn late_parent_takes_over_reply_threaded_under_an_ancestor() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let a = insert(&store, NewMessage::new("a@x").date(100));
    let mut c = NewMessage::new("c@x").in_reply_to("b@x").date(300);
    c.references = vec!["a@x".to_string(), "b@x".to_string()];
    let c = insert(&store, c);
    let d = insert(&store, NewMessage::new("d@x").in_reply_to("c@x").date(400));
    assert_eq!(store.replies(a).unwrap(), vec![c]);

    let b = insert(&store, NewMessage::new("b@x").in_reply_to("a@x").date(200));

    assert_eq!(store.replies(a).unwrap(), vec![b]);
    assert_eq!(store.replies(b).unwrap(), vec![c]);
    assert_eq!(store.replies(c).unwrap(), vec![d]);
    assert_eq!(store.get_message(c).unwrap().unwrap().parent, Some(b));
    assert_eq!(roots(&store, "*"), vec![a]);

    let thread = store.get_message(a).unwrap().unwrap().thread_id;
    for id in [b, c, d] {
        assert_eq!(store.get_message(id).unwrap().unwrap().thread_id, thread);
    }
}

#[test]
fn orphan_subtree_joins_the_conversation_of_its_parent() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let root = insert(&store, NewMessage::new("root@x").date(100));
    let orphan = insert(&store, NewMessage::new("orphan@x").in_reply_to("middle@x").date(300));
    let nested = insert(&store, NewMessage::new("nested@x").in_reply_to("orphan@x").date(400));
    assert_eq!(roots(&store, "*"), vec![root, orphan]);

    let middle = insert(&store, NewMessage::new("middle@x").in_reply_to("root@x").date(200));

    assert_eq!(roots(&store, "*"), vec![root]);
    assert_eq!(store.replies(middle).unwrap(), vec![orphan]);
    let thread = store.get_message(root).unwrap().unwrap().thread_id;
    assert_eq!(store.get_message(nested).unwrap().unwrap().thread_id, thread);
}

#[test]
fn duplicate_message_id_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    insert(&store, NewMessage::new("same@x"));
    let err = store.insert_message(&NewMessage::new("same@x")).unwrap_err();
    assert!(matches!(err, RepoError::DuplicateMessage(ref id) if id == "same@x"));
    assert_eq!(store.count_messages().unwrap(), 1);
}

#[test]
fn header_joins_repeated_values_and_defaults_to_empty() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let id = insert(
        &store,
        NewMessage::new("h@x")
            .header("To", "a@x")
            .header("Subject", "hello")
            .header("to", "b@x"),
    );

    assert_eq!(store.header(id, "To").unwrap(), "a@x, b@x");
    assert_eq!(store.header(id, "SUBJECT").unwrap(), "hello");
    assert_eq!(store.header(id, "Cc").unwrap(), "");
}

#[test]
fn add_tag_is_idempotent_and_validated() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();
    let id = insert(&store, NewMessage::new("t@x").tag("inbox"));

    store.add_tag(id, "mute-thread").unwrap();
    store.add_tag(id, "mute-thread").unwrap();
    assert_eq!(
        store.tags(id).unwrap(),
        BTreeSet::from(["inbox".to_string(), "mute-thread".to_string()])
    );

    assert!(matches!(
        store.add_tag(id, "  "),
        Err(RepoError::InvalidTag(_))
    ));
}

#[test]
fn tags_with_surrounding_whitespace_are_rejected_not_trimmed() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();
    let id = insert(&store, NewMessage::new("w@x"));

    assert!(matches!(
        store.add_tag(id, " muted"),
        Err(RepoError::InvalidTag(_))
    ));
    assert!(matches!(
        store.add_tag(id, "muted\t"),
        Err(RepoError::InvalidTag(_))
    ));
    let err = store
        .insert_message(&NewMessage::new("v@x").tag("inbox "))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidTag(_)));
    assert!(store.tags(id).unwrap().is_empty());
    assert!(store.find_by_message_id("v@x").unwrap().is_none());

    store.add_tag(id, "muted thread").unwrap();
    assert_eq!(roots(&store, "tag:\"muted thread\""), vec![id]);
}

#[test]
fn unknown_message_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(store.tags(missing), Err(RepoError::NotFound(id)) if id == missing));
    assert!(matches!(
        store.add_tag(missing, "x"),
        Err(RepoError::NotFound(_))
    ));
    assert!(matches!(
        store.header(missing, "To"),
        Err(RepoError::NotFound(_))
    ));
    assert!(matches!(
        store.replies(missing),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn thread_search_evaluates_each_conjunct_against_any_message() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    // Command tag and processed marker on the root, new reply unprocessed.
    let root = insert(
        &store,
        NewMessage::new("root@x")
            .tag("mute-thread")
            .tag("mute-processed"),
    );
    let reply = insert(&store, NewMessage::new("reply@x").in_reply_to("root@x"));

    let query = "tag:mute-thread AND NOT tag:mute-processed";
    assert_eq!(roots(&store, query), vec![root]);
    // Per-message evaluation needs both on one message.
    assert!(store
        .search_messages(store.query(query).unwrap())
        .unwrap()
        .is_empty());

    store.add_tag(reply, "mute-processed").unwrap();
    assert!(roots(&store, query).is_empty());
}

#[test]
fn header_and_id_terms_select_messages() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    let from_alice = insert(
        &store,
        NewMessage::new("one@x")
            .date(1)
            .header("From", "Alice <alice@example.com>")
            .header("Subject", "Quarterly 50% report"),
    );
    let from_bob = insert(
        &store,
        NewMessage::new("two@x")
            .date(2)
            .header("From", "bob@example.com")
            .header("Subject", "Lunch"),
    );

    let search = |text: &str| store.search_messages(store.query(text).unwrap()).unwrap();
    assert_eq!(search("from:ALICE"), vec![from_alice]);
    assert_eq!(search("subject:\"50% report\""), vec![from_alice]);
    assert!(search("subject:\"5_%\"").is_empty());
    assert_eq!(search("lunch"), vec![from_bob]);
    assert_eq!(search("id:<two@x>"), vec![from_bob]);
    assert_eq!(search("NOT from:alice"), vec![from_bob]);
    assert_eq!(search("from:alice OR from:bob"), vec![from_alice, from_bob]);
}

#[test]
fn malformed_query_is_a_query_error() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteMessageStore::try_new(&conn).unwrap();

    assert!(matches!(
        store.query("tag:a AND (tag:b"),
        Err(RepoError::Query(_))
    ));
}
