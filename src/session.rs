// src/session.rs
use std::time::Duration;

use log::{debug, info, warn};

use crate::events::EventSink;
use crate::ndef;
use crate::types::{
    Availability, NdefCapability, NdefRecord, SessionError, SessionMode, UidInfo,
};

/// Delay before polling restarts after a multi-tag detection.
pub const MULTI_TAG_RETRY: Duration = Duration::from_millis(500);

/// Hardware operations the controller sequences a session through. The PC/SC
/// backend implements this for real readers; tests drive a scripted mock.
pub trait TagProvider {
    type Tag;

    fn check_availability(&self) -> Availability;
    fn connect(&mut self, tag: &Self::Tag) -> Result<(), String>;
    fn query_capability(&mut self, tag: &Self::Tag) -> Result<NdefCapability, String>;
    /// Ok(None) means the tag answered but carried no NDEF message.
    fn read_message(&mut self, tag: &Self::Tag) -> Result<Option<Vec<NdefRecord>>, String>;
    fn write_message(&mut self, tag: &Self::Tag, records: &[NdefRecord]) -> Result<(), String>;
    fn read_uid(&mut self, tag: &Self::Tag) -> Result<Vec<u8>, String>;
    fn reader_name(&self, tag: &Self::Tag) -> String;
    fn restart_polling(&mut self);
    /// Terminal teardown of the hardware session. Idempotent.
    fn invalidate(&mut self, alert_text: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Polling,
    TagsDetected,
    Connecting,
    QueryingCapability,
    Reading,
    ReadingUid,
    Writing,
    Invalidated(SessionOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Data delivered or write confirmed.
    Completed,
    /// The tag answered but had nothing for us. Not a success, not an error.
    Empty,
    Failed(SessionError),
    Cancelled,
}

/// One bounded hardware interaction, from polling to invalidation. Owned
/// exclusively by the controller; invalidated exactly once.
#[derive(Debug)]
pub struct TagSession {
    pub mode: SessionMode,
    pub pending_message: Option<Vec<NdefRecord>>,
    pub state: SessionState,
    pub alert_text: String,
}

/// Drives the polling -> detect -> connect -> capability -> transfer ->
/// invalidate cycle. Idle whenever `session` is None; at most one session is
/// live at a time.
pub struct SessionController {
    session: Option<TagSession>,
    sink: EventSink,
}

impl SessionController {
    pub fn new(sink: EventSink) -> Self {
        Self {
            session: None,
            sink,
        }
    }

    pub fn session(&self) -> Option<&TagSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        matches!(&self.session, Some(s) if !matches!(s.state, SessionState::Invalidated(_)))
    }

    /// Starts a read, UID, or write session. A live session is never replaced.
    pub fn start_session<P: TagProvider>(
        &mut self,
        provider: &mut P,
        mode: SessionMode,
        pending_message: Option<Vec<NdefRecord>>,
    ) {
        if self.is_active() {
            warn!("a session is already in progress, ignoring start request");
            self.sink.session_status("A session is already in progress.");
            return;
        }

        let alert = match mode {
            SessionMode::Write => "Hold a tag near the reader to write.",
            _ => "Hold a tag near the reader.",
        };
        self.session = Some(TagSession {
            mode,
            pending_message,
            state: SessionState::Polling,
            alert_text: alert.to_string(),
        });

        let availability = provider.check_availability();
        if !availability.available {
            self.finish(
                provider,
                SessionOutcome::Failed(SessionError::HardwareUnavailable(availability.message)),
                "NFC hardware is not available on this device.",
            );
            return;
        }

        info!("{:?} session started", mode);
        self.sink.session_status(alert);
    }

    /// Hardware delivered a detection while polling. Returns the retry delay
    /// when extra tags must be removed before the session can continue.
    pub fn handle_tags_detected<P: TagProvider>(
        &mut self,
        provider: &mut P,
        tags: &[P::Tag],
    ) -> Option<Duration> {
        match &self.session {
            Some(s) if s.state == SessionState::Polling => {}
            _ => {
                debug!("tag detection outside of polling, ignoring");
                return None;
            }
        }
        self.set_state(SessionState::TagsDetected);

        if tags.is_empty() {
            self.finish(
                provider,
                SessionOutcome::Failed(SessionError::NoTagDetected),
                "No tags detected.",
            );
            return None;
        }

        if tags.len() > 1 {
            // the session stays open; polling resumes once the user has had a
            // moment to take the extra tags away
            warn!(
                "{} tags detected, only one can be processed at a time",
                tags.len()
            );
            self.set_state(SessionState::Polling);
            self.set_alert("More than one tag detected. Please remove extra tags and try again.");
            return Some(MULTI_TAG_RETRY);
        }

        let tag = &tags[0];
        self.set_state(SessionState::Connecting);
        if let Err(e) = provider.connect(tag) {
            self.finish(
                provider,
                SessionOutcome::Failed(SessionError::ConnectFailed(e)),
                "Unable to connect to tag.",
            );
            return None;
        }

        match self.mode() {
            Some(SessionMode::ReadUid) => self.read_uid_from(provider, tag),
            Some(mode) => self.query_and_transfer(provider, tag, mode),
            None => {}
        }
        None
    }

    /// The hardware layer (or the caller, via stop) reported user
    /// cancellation. Tears the session down without surfacing an error.
    pub fn cancel<P: TagProvider>(&mut self, provider: &mut P) {
        if !self.is_active() {
            debug!("cancel with no active session");
            return;
        }
        info!("session cancelled by user");
        self.finish(provider, SessionOutcome::Cancelled, "Session stopped.");
    }

    fn query_and_transfer<P: TagProvider>(
        &mut self,
        provider: &mut P,
        tag: &P::Tag,
        mode: SessionMode,
    ) {
        self.set_state(SessionState::QueryingCapability);
        let capability = match provider.query_capability(tag) {
            Ok(capability) => capability,
            Err(e) => {
                self.finish(
                    provider,
                    SessionOutcome::Failed(SessionError::CapabilityQueryFailed(e)),
                    "Unable to query NDEF status of tag.",
                );
                return;
            }
        };
        debug!("tag capability: {:?}", capability);

        if capability == NdefCapability::NotSupported {
            self.finish(
                provider,
                SessionOutcome::Failed(SessionError::NotNdefCompliant),
                "Tag is not NDEF compliant.",
            );
            return;
        }

        if mode == SessionMode::Write {
            match capability {
                NdefCapability::ReadOnly => self.finish(
                    provider,
                    SessionOutcome::Failed(SessionError::ReadOnlyTag),
                    "Tag is read-only.",
                ),
                NdefCapability::Unknown => self.finish(
                    provider,
                    SessionOutcome::Failed(SessionError::UnknownTagStatus),
                    "Unknown NDEF tag status.",
                ),
                _ => self.write_to(provider, tag),
            }
        } else {
            self.read_from(provider, tag);
        }
    }

    fn read_from<P: TagProvider>(&mut self, provider: &mut P, tag: &P::Tag) {
        self.set_state(SessionState::Reading);
        match provider.read_message(tag) {
            Err(e) => self.finish(
                provider,
                SessionOutcome::Failed(SessionError::ReadFailed(e)),
                "Failed to read NDEF from tag.",
            ),
            Ok(None) => self.finish(provider, SessionOutcome::Empty, "No NDEF message found."),
            Ok(Some(records)) => {
                let message = ndef::decode_message(&records);
                info!("read {} NDEF record(s) from tag", message.records.len());
                self.sink.tag_read(vec![message]);
                self.finish(provider, SessionOutcome::Completed, "Found 1 NDEF message.");
            }
        }
    }

    fn write_to<P: TagProvider>(&mut self, provider: &mut P, tag: &P::Tag) {
        self.set_state(SessionState::Writing);
        let pending = self
            .session
            .as_ref()
            .and_then(|s| s.pending_message.clone());
        let Some(records) = pending else {
            self.finish(provider, SessionOutcome::Empty, "No message to write.");
            return;
        };
        match provider.write_message(tag, &records) {
            Err(e) => self.finish(
                provider,
                SessionOutcome::Failed(SessionError::WriteFailed(e)),
                "Failed to write NDEF message.",
            ),
            Ok(()) => {
                info!("wrote {} NDEF record(s) to tag", records.len());
                self.sink.write_success();
                self.finish(
                    provider,
                    SessionOutcome::Completed,
                    "NDEF message written successfully.",
                );
            }
        }
    }

    fn read_uid_from<P: TagProvider>(&mut self, provider: &mut P, tag: &P::Tag) {
        self.set_state(SessionState::ReadingUid);
        match provider.read_uid(tag) {
            Err(e) => self.finish(
                provider,
                SessionOutcome::Failed(SessionError::ReadFailed(e)),
                "Failed to read tag UID.",
            ),
            Ok(uid) if uid.is_empty() => self.finish(
                provider,
                SessionOutcome::Failed(SessionError::ReadFailed(
                    "tag returned an empty UID".to_string(),
                )),
                "Failed to read tag UID.",
            ),
            Ok(uid) => {
                let info = uid_info(&uid, provider.reader_name(tag));
                info!("tag UID read: {}", info.uid);
                self.sink.uid_read(info);
                self.finish(provider, SessionOutcome::Completed, "Tag UID read.");
            }
        }
    }

    /// Terminal transition: sets the final alert text and tears the hardware
    /// session down, emitting at most one terminal event. A session that is
    /// already invalidated stays untouched.
    fn finish<P: TagProvider>(
        &mut self,
        provider: &mut P,
        outcome: SessionOutcome,
        alert_text: &str,
    ) {
        let Some(session) = self.session.as_mut() else {
            debug!("finish with no session");
            return;
        };
        if matches!(session.state, SessionState::Invalidated(_)) {
            debug!("session already invalidated");
            return;
        }
        session.alert_text = alert_text.to_string();
        session.state = SessionState::Invalidated(outcome.clone());

        provider.invalidate(alert_text);
        self.sink.session_status(alert_text);
        if let SessionOutcome::Failed(err) = &outcome {
            self.sink.error(err);
        }
        info!("session invalidated: {:?}", outcome);
    }

    fn mode(&self) -> Option<SessionMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    fn set_state(&mut self, state: SessionState) {
        if let Some(session) = self.session.as_mut() {
            debug!("session state -> {:?}", state);
            session.state = state;
        }
    }

    fn set_alert(&mut self, text: &str) {
        if let Some(session) = self.session.as_mut() {
            session.alert_text = text.to_string();
        }
        self.sink.session_status(text);
    }
}

pub fn uid_info(uid: &[u8], reader: String) -> UidInfo {
    let uid_formatted = uid
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    let card_type = match uid.len() {
        4 => "MIFARE Classic or other 4-byte UID card",
        7 => "MIFARE Ultralight, NTAG or other 7-byte UID card",
        _ => "Unknown card type",
    };
    UidInfo {
        uid: hex::encode(uid),
        uid_formatted,
        uid_length: uid.len(),
        card_type: card_type.to_string(),
        timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        reader,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NdefPayload, OutgoingMessage};
    use crossbeam_channel::{unbounded, Receiver};

    struct MockProvider {
        availability: Availability,
        connect_result: Result<(), String>,
        capability: Result<NdefCapability, String>,
        read_result: Result<Option<Vec<NdefRecord>>, String>,
        write_result: Result<(), String>,
        uid_result: Result<Vec<u8>, String>,
        connects: usize,
        capability_queries: usize,
        writes: Vec<Vec<NdefRecord>>,
        invalidations: Vec<String>,
    }

    impl Default for MockProvider {
        fn default() -> Self {
            Self {
                availability: Availability {
                    available: true,
                    message: "NFC hardware is available".to_string(),
                },
                connect_result: Ok(()),
                capability: Ok(NdefCapability::ReadWrite),
                read_result: Ok(None),
                write_result: Ok(()),
                uid_result: Ok(vec![0x04, 0xA1, 0x23]),
                connects: 0,
                capability_queries: 0,
                writes: Vec::new(),
                invalidations: Vec::new(),
            }
        }
    }

    impl TagProvider for MockProvider {
        type Tag = &'static str;

        fn check_availability(&self) -> Availability {
            self.availability.clone()
        }

        fn connect(&mut self, _tag: &&'static str) -> Result<(), String> {
            self.connects += 1;
            self.connect_result.clone()
        }

        fn query_capability(&mut self, _tag: &&'static str) -> Result<NdefCapability, String> {
            self.capability_queries += 1;
            self.capability.clone()
        }

        fn read_message(
            &mut self,
            _tag: &&'static str,
        ) -> Result<Option<Vec<NdefRecord>>, String> {
            self.read_result.clone()
        }

        fn write_message(
            &mut self,
            _tag: &&'static str,
            records: &[NdefRecord],
        ) -> Result<(), String> {
            self.writes.push(records.to_vec());
            self.write_result.clone()
        }

        fn read_uid(&mut self, _tag: &&'static str) -> Result<Vec<u8>, String> {
            self.uid_result.clone()
        }

        fn reader_name(&self, tag: &&'static str) -> String {
            tag.to_string()
        }

        fn restart_polling(&mut self) {}

        fn invalidate(&mut self, alert_text: &str) {
            self.invalidations.push(alert_text.to_string());
        }
    }

    fn controller() -> (SessionController, Receiver<OutgoingMessage>) {
        let (tx, rx) = unbounded();
        (SessionController::new(EventSink::new(tx)), rx)
    }

    fn drain(rx: &Receiver<OutgoingMessage>) -> Vec<OutgoingMessage> {
        rx.try_iter().collect()
    }

    fn error_kinds(events: &[OutgoingMessage]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                OutgoingMessage::NFC_ERROR { kind, .. } => Some(kind.clone()),
                _ => None,
            })
            .collect()
    }

    fn outcome(ctl: &SessionController) -> SessionOutcome {
        match &ctl.session().unwrap().state {
            SessionState::Invalidated(outcome) => outcome.clone(),
            state => panic!("session not invalidated, state {:?}", state),
        }
    }

    fn text_message(text: &str) -> Vec<NdefRecord> {
        vec![ndef::encode_record(&NdefPayload {
            record_type: "T".to_string(),
            payload: text.to_string(),
        })]
    }

    #[test]
    fn unavailable_hardware_fails_before_polling() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            availability: Availability {
                available: false,
                message: "NFC hardware is not available on this device".to_string(),
            },
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Read, None);

        assert!(!ctl.is_active());
        assert!(matches!(
            outcome(&ctl),
            SessionOutcome::Failed(SessionError::HardwareUnavailable(_))
        ));
        assert_eq!(provider.connects, 0);
        assert_eq!(error_kinds(&drain(&rx)), vec!["hardware_unavailable"]);
    }

    #[test]
    fn zero_tags_is_no_tag_error_without_connect() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider::default();

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.handle_tags_detected(&mut provider, &[]);

        assert_eq!(
            outcome(&ctl),
            SessionOutcome::Failed(SessionError::NoTagDetected)
        );
        assert_eq!(provider.connects, 0);
        assert_eq!(error_kinds(&drain(&rx)), vec!["no_tag_detected"]);
        assert_eq!(ctl.session().unwrap().alert_text, "No tags detected.");
    }

    #[test]
    fn multi_tag_schedules_retry_and_keeps_session_open() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            read_result: Ok(Some(text_message("Hi"))),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Read, None);
        let retry = ctl.handle_tags_detected(&mut provider, &["reader-a", "reader-b"]);

        assert_eq!(retry, Some(MULTI_TAG_RETRY));
        assert!(ctl.is_active());
        assert_eq!(ctl.session().unwrap().state, SessionState::Polling);
        assert_eq!(provider.connects, 0);
        assert!(error_kinds(&drain(&rx)).is_empty());

        // extra tag removed, polling delivers a single tag
        let retry = ctl.handle_tags_detected(&mut provider, &["reader-a"]);
        assert_eq!(retry, None);
        assert_eq!(provider.connects, 1);
        assert_eq!(outcome(&ctl), SessionOutcome::Completed);

        let events = drain(&rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, OutgoingMessage::TAG_READ { .. })));
    }

    #[test]
    fn read_delivers_decoded_message() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            read_result: Ok(Some(text_message("Hi"))),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        let events = drain(&rx);
        let message = events
            .iter()
            .find_map(|e| match e {
                OutgoingMessage::TAG_READ { messages } => Some(messages.clone()),
                _ => None,
            })
            .expect("no TAG_READ event");
        assert_eq!(message.len(), 1);
        assert_eq!(message[0].records[0].record_type, "T");
        assert_eq!(message[0].records[0].payload, "Hi");
        assert_eq!(ctl.session().unwrap().alert_text, "Found 1 NDEF message.");
    }

    #[test]
    fn read_without_message_is_neutral() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            read_result: Ok(None),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert_eq!(outcome(&ctl), SessionOutcome::Empty);
        let events = drain(&rx);
        assert!(error_kinds(&events).is_empty());
        assert!(!events
            .iter()
            .any(|e| matches!(e, OutgoingMessage::TAG_READ { .. })));
        assert_eq!(ctl.session().unwrap().alert_text, "No NDEF message found.");
    }

    #[test]
    fn read_failure_surfaces_read_failed() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            read_result: Err("transmit error".to_string()),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert_eq!(error_kinds(&drain(&rx)), vec!["read_failed"]);
    }

    #[test]
    fn connect_failure_ends_session() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            connect_result: Err("sharing violation".to_string()),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert!(matches!(
            outcome(&ctl),
            SessionOutcome::Failed(SessionError::ConnectFailed(_))
        ));
        assert_eq!(provider.capability_queries, 0);
        assert_eq!(error_kinds(&drain(&rx)), vec!["connect_failed"]);
    }

    #[test]
    fn non_compliant_tag_fails_read_and_write_alike() {
        for mode in [SessionMode::Read, SessionMode::Write] {
            let (mut ctl, rx) = controller();
            let mut provider = MockProvider {
                capability: Ok(NdefCapability::NotSupported),
                ..Default::default()
            };

            let pending = (mode == SessionMode::Write).then(|| text_message("x"));
            ctl.start_session(&mut provider, mode, pending);
            ctl.handle_tags_detected(&mut provider, &["reader-a"]);

            assert_eq!(error_kinds(&drain(&rx)), vec!["not_ndef_compliant"]);
            assert_eq!(
                ctl.session().unwrap().alert_text,
                "Tag is not NDEF compliant."
            );
        }
    }

    #[test]
    fn read_only_tag_terminates_write_before_writing() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            capability: Ok(NdefCapability::ReadOnly),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Write, Some(text_message("Hi")));
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert_eq!(
            outcome(&ctl),
            SessionOutcome::Failed(SessionError::ReadOnlyTag)
        );
        assert!(provider.writes.is_empty());
        assert_eq!(error_kinds(&drain(&rx)), vec!["read_only_tag"]);
    }

    #[test]
    fn unknown_status_terminates_write_but_not_read() {
        let (mut ctl, _rx) = controller();
        let mut provider = MockProvider {
            capability: Ok(NdefCapability::Unknown),
            ..Default::default()
        };
        ctl.start_session(&mut provider, SessionMode::Write, Some(text_message("x")));
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);
        assert_eq!(
            outcome(&ctl),
            SessionOutcome::Failed(SessionError::UnknownTagStatus)
        );
        assert!(provider.writes.is_empty());

        // a read session proceeds on an unknown status
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            capability: Ok(NdefCapability::Unknown),
            read_result: Ok(Some(text_message("ok"))),
            ..Default::default()
        };
        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);
        assert_eq!(outcome(&ctl), SessionOutcome::Completed);
        assert!(error_kinds(&drain(&rx)).is_empty());
    }

    #[test]
    fn write_success_confirms_once() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider::default();
        let message = text_message("Hi");

        ctl.start_session(&mut provider, SessionMode::Write, Some(message.clone()));
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert_eq!(outcome(&ctl), SessionOutcome::Completed);
        assert_eq!(provider.writes, vec![message]);
        let confirmations = drain(&rx)
            .iter()
            .filter(|e| matches!(e, OutgoingMessage::WRITE_SUCCESS { .. }))
            .count();
        assert_eq!(confirmations, 1);
        assert_eq!(
            ctl.session().unwrap().alert_text,
            "NDEF message written successfully."
        );
    }

    #[test]
    fn write_without_pending_message_is_neutral() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider::default();

        ctl.start_session(&mut provider, SessionMode::Write, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert_eq!(outcome(&ctl), SessionOutcome::Empty);
        assert!(provider.writes.is_empty());
        let events = drain(&rx);
        assert!(error_kinds(&events).is_empty());
        assert!(!events
            .iter()
            .any(|e| matches!(e, OutgoingMessage::WRITE_SUCCESS { .. })));
    }

    #[test]
    fn cancellation_emits_no_error_event() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider::default();

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.cancel(&mut provider);

        assert_eq!(outcome(&ctl), SessionOutcome::Cancelled);
        assert_eq!(provider.invalidations.len(), 1);
        assert!(error_kinds(&drain(&rx)).is_empty());
    }

    #[test]
    fn cancel_when_idle_is_a_no_op() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider::default();

        ctl.cancel(&mut provider);

        assert!(ctl.session().is_none());
        assert!(provider.invalidations.is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn live_session_is_never_replaced() {
        let (mut ctl, _rx) = controller();
        let mut provider = MockProvider::default();

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.start_session(&mut provider, SessionMode::Write, Some(text_message("x")));

        let session = ctl.session().unwrap();
        assert_eq!(session.mode, SessionMode::Read);
        assert_eq!(session.state, SessionState::Polling);
    }

    #[test]
    fn session_invalidates_exactly_once() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            read_result: Err("boom".to_string()),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::Read, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);
        // a late detection after invalidation must not re-enter the machine
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);
        ctl.cancel(&mut provider);

        assert_eq!(provider.invalidations.len(), 1);
        assert_eq!(provider.connects, 1);
        assert_eq!(error_kinds(&drain(&rx)), vec!["read_failed"]);
    }

    #[test]
    fn uid_session_skips_capability_query() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider::default();

        ctl.start_session(&mut provider, SessionMode::ReadUid, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert_eq!(outcome(&ctl), SessionOutcome::Completed);
        assert_eq!(provider.capability_queries, 0);
        let info = drain(&rx)
            .into_iter()
            .find_map(|e| match e {
                OutgoingMessage::UID_READ(info) => Some(info),
                _ => None,
            })
            .expect("no UID_READ event");
        assert_eq!(info.uid, "04a123");
        assert_eq!(info.uid_formatted, "04 A1 23");
        assert_eq!(info.uid_length, 3);
        assert_eq!(info.reader, "reader-a");
    }

    #[test]
    fn empty_uid_is_a_read_failure() {
        let (mut ctl, rx) = controller();
        let mut provider = MockProvider {
            uid_result: Ok(Vec::new()),
            ..Default::default()
        };

        ctl.start_session(&mut provider, SessionMode::ReadUid, None);
        ctl.handle_tags_detected(&mut provider, &["reader-a"]);

        assert_eq!(error_kinds(&drain(&rx)), vec!["read_failed"]);
    }

    #[test]
    fn uid_card_type_guess_follows_uid_length() {
        assert!(uid_info(&[0; 4], String::new()).card_type.contains("MIFARE Classic"));
        assert!(uid_info(&[0; 7], String::new()).card_type.contains("NTAG"));
        assert!(uid_info(&[0; 5], String::new()).card_type.contains("Unknown"));
    }
}
