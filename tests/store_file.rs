//! libSQL store on a real database file.

use lead_assist::lead::{LeadFields, LeadRecord, LeadSchema};
use lead_assist::store::{ConversationTurnRecord, LeadStore, LibSqlBackend, turns_to_transcript};

#[tokio::test]
async fn data_survives_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("lead-assist.db");
    let schema = LeadSchema::default();

    {
        let store = LibSqlBackend::new_local(&path).await.unwrap();
        for (user, bot) in [("Hallo", "Wie heißen Sie?"), ("Ich bin Merten", "Danke!")] {
            store
                .write_conversation_turn(&ConversationTurnRecord::new(
                    "conv-1",
                    Some("cus-1".into()),
                    user,
                    bot,
                ))
                .await
                .unwrap();
        }
        let mut fields = LeadFields::empty(&schema);
        fields.set("name", Some("Merten".into()));
        store
            .write_lead_record(&LeadRecord::new("conv-1", Some("cus-1".into()), fields))
            .await
            .unwrap();
    }

    let store = LibSqlBackend::new_local(&path).await.unwrap();
    assert_eq!(store.list_conversations().await.unwrap(), vec!["conv-1".to_string()]);

    let turns = store.conversation_turns("conv-1").await.unwrap();
    assert_eq!(
        turns_to_transcript(&turns),
        "user: Hallo\nassistant: Wie heißen Sie?\nuser: Ich bin Merten\nassistant: Danke!\n"
    );

    let lead = store.lead_record("conv-1").await.unwrap().unwrap();
    assert_eq!(lead.get("name"), Some("Merten"));
    assert_eq!(lead.fields.len(), schema.len());
}

#[tokio::test]
async fn rewriting_a_lead_replaces_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibSqlBackend::new_local(&dir.path().join("db.sqlite")).await.unwrap();
    let schema = LeadSchema::default();

    let mut first = LeadFields::empty(&schema);
    first.set("company", Some("TCW".into()));
    store
        .write_lead_record(&LeadRecord::new("conv-2", None, first))
        .await
        .unwrap();

    let mut second = LeadFields::empty(&schema);
    second.set("company", Some("TCW GmbH".into()));
    store
        .write_lead_record(&LeadRecord::new("conv-2", None, second))
        .await
        .unwrap();

    let lead = store.lead_record("conv-2").await.unwrap().unwrap();
    assert_eq!(lead.get("company"), Some("TCW GmbH"));
}
