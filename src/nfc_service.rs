// src/nfc_service.rs
use std::ffi::CString;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use log::{debug, error, info};
use pcsc::{Card, Context, Protocols, ReaderState, Scope, ShareMode, State, PNP_NOTIFICATION};

use crate::events::EventSink;
use crate::session::{SessionController, TagProvider};
use crate::types::{
    Availability, NdefCapability, NdefRecord, NfcCommand, SessionMode, CARD_TYPE_MIFARE_1K,
    CARD_TYPE_NTAG,
};
use crate::{apdu, cards, ndef};

/// Tag provider backed by a PC/SC smart-card reader. A detected tag is
/// identified by the name of the reader it sits on.
pub struct PcscProvider {
    ctx: Context,
    readers: Vec<CString>,
    active: Option<ActiveCard>,
}

struct ActiveCard {
    card: Card,
    card_type: String,
}

impl PcscProvider {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            readers: Vec::new(),
            active: None,
        }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn readers(&self) -> &[CString] {
        &self.readers
    }

    pub fn refresh_readers(&mut self, buf: &mut [u8]) {
        match self.ctx.list_readers(buf) {
            Ok(names) => self.readers = names.map(CString::from).collect(),
            Err(err) => {
                debug!("listing readers failed: {}", err);
                self.readers.clear();
            }
        }
    }

    fn active_card(&self) -> Result<&ActiveCard, String> {
        self.active.as_ref().ok_or_else(|| "no connected card".to_string())
    }
}

fn card_type_from_atr(card: &Card) -> String {
    let mut names_buf = [0u8; 128];
    let mut atr_buf = [0u8; 64];
    match card.status2(&mut names_buf, &mut atr_buf) {
        Ok(status) => match status.atr().last() {
            Some(last) => format!("{:x}", last),
            None => "unknown".to_string(),
        },
        Err(_) => "unknown".to_string(),
    }
}

impl TagProvider for PcscProvider {
    type Tag = CString;

    fn check_availability(&self) -> Availability {
        if self.readers.is_empty() {
            Availability {
                available: false,
                message: "NFC hardware is not available on this device".to_string(),
            }
        } else {
            Availability {
                available: true,
                message: "NFC hardware is available".to_string(),
            }
        }
    }

    fn connect(&mut self, tag: &CString) -> Result<(), String> {
        let card = self
            .ctx
            .connect(tag, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| e.to_string())?;
        let card_type = card_type_from_atr(&card);
        debug!("connected to card type {:?} on {:?}", card_type, tag);
        self.active = Some(ActiveCard { card, card_type });
        Ok(())
    }

    fn query_capability(&mut self, _tag: &CString) -> Result<NdefCapability, String> {
        let active = self.active_card()?;
        match active.card_type.as_str() {
            CARD_TYPE_MIFARE_1K => Ok(NdefCapability::ReadWrite),
            CARD_TYPE_NTAG => {
                // the capability container lives in page 3:
                // magic, version, data area size, access conditions
                let cc = apdu::read_binary(&active.card, 3, 4)?;
                if cc.len() < 4 || cc[0] != 0xE1 {
                    return Ok(NdefCapability::NotSupported);
                }
                if cc[3] & 0x0F == 0x0F {
                    Ok(NdefCapability::ReadOnly)
                } else {
                    Ok(NdefCapability::ReadWrite)
                }
            }
            _ => Ok(NdefCapability::Unknown),
        }
    }

    fn read_message(&mut self, _tag: &CString) -> Result<Option<Vec<NdefRecord>>, String> {
        let active = self.active_card()?;
        let raw = if active.card_type == CARD_TYPE_MIFARE_1K {
            cards::read_mifare(&active.card)?
        } else {
            cards::read_ntag(&active.card)?
        };
        match ndef::unwrap_tlv(&raw) {
            Ok(bytes) => {
                let records = ndef::parse_ndef_records(bytes);
                if records.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(records))
                }
            }
            Err(reason) => {
                debug!("no NDEF container on tag: {}", reason);
                Ok(None)
            }
        }
    }

    fn write_message(&mut self, _tag: &CString, records: &[NdefRecord]) -> Result<(), String> {
        let active = self.active_card()?;
        let tlv = ndef::wrap_in_tlv(&ndef::emit_message(records));
        if active.card_type == CARD_TYPE_MIFARE_1K {
            cards::write_mifare(&active.card, &tlv)
        } else {
            cards::write_ntag(&active.card, &tlv)
        }
    }

    fn read_uid(&mut self, _tag: &CString) -> Result<Vec<u8>, String> {
        let active = self.active_card()?;
        apdu::get_uid(&active.card)
    }

    fn reader_name(&self, tag: &CString) -> String {
        tag.to_string_lossy().into_owned()
    }

    fn restart_polling(&mut self) {
        debug!("polling restarted");
        self.active = None;
    }

    fn invalidate(&mut self, alert_text: &str) {
        if self.active.take().is_some() {
            info!("hardware session closed: {}", alert_text);
        }
    }
}

pub fn run(sink: EventSink, rx: Receiver<NfcCommand>, availability: Arc<Mutex<Availability>>) {
    info!("starting NFC service");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("failed to establish PC/SC context: {}", err);
            sink.reader_status(false, "NFC hardware is not available on this device");
            return;
        }
    };

    let mut provider = PcscProvider::new(ctx);
    let mut controller = SessionController::new(sink.clone());

    let mut readers_buf = [0; 2048];
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
    let mut retry_at: Option<Instant> = None;

    refresh(
        &mut provider,
        &mut readers_buf,
        &mut reader_states,
        &sink,
        &availability,
        &mut controller,
    );

    loop {
        // 1. wait for a hardware state change
        if let Err(err) = provider
            .ctx()
            .get_status_change(Duration::from_millis(500), &mut reader_states)
        {
            if err != pcsc::Error::Timeout {
                error!("PC/SC error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        }

        // 2. commands from the facade
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                NfcCommand::StartScan => {
                    controller.start_session(&mut provider, SessionMode::Read, None);
                    deliver_present_tags(
                        &mut controller,
                        &mut provider,
                        &reader_states,
                        &mut retry_at,
                    );
                }
                NfcCommand::StartUidScan => {
                    controller.start_session(&mut provider, SessionMode::ReadUid, None);
                    deliver_present_tags(
                        &mut controller,
                        &mut provider,
                        &reader_states,
                        &mut retry_at,
                    );
                }
                NfcCommand::Write { records } => {
                    let wire: Vec<NdefRecord> = records.iter().map(ndef::encode_record).collect();
                    controller.start_session(&mut provider, SessionMode::Write, Some(wire));
                    deliver_present_tags(
                        &mut controller,
                        &mut provider,
                        &reader_states,
                        &mut retry_at,
                    );
                }
                NfcCommand::StopScan => {
                    retry_at = None;
                    controller.cancel(&mut provider);
                }
                NfcCommand::CheckReaderStatus => refresh(
                    &mut provider,
                    &mut readers_buf,
                    &mut reader_states,
                    &sink,
                    &availability,
                    &mut controller,
                ),
            }
        }

        // 3. hardware events
        let mut readers_changed = false;
        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("reader hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        let mut detection_pending = false;
        for rs in reader_states.iter_mut().skip(1) {
            if !rs.event_state().intersects(State::CHANGED) {
                continue;
            }
            let was_present = rs.current_state().intersects(State::PRESENT);
            let now_present = rs.event_state().intersects(State::PRESENT);

            if now_present && !was_present {
                info!("tag placed on {:?}", rs.name());
                sink.session_status("Tag detected.");
                detection_pending = true;
            }
            if !now_present && was_present {
                info!("tag removed from {:?}", rs.name());
                sink.session_status("Tag removed.");
            }
            rs.sync_current_state();
        }

        if detection_pending {
            deliver_present_tags(&mut controller, &mut provider, &reader_states, &mut retry_at);
        }

        // 4. refresh the reader list after hot-plug
        if readers_changed {
            refresh(
                &mut provider,
                &mut readers_buf,
                &mut reader_states,
                &sink,
                &availability,
                &mut controller,
            );
        }

        // 5. deferred multi-tag retry
        if retry_at.is_some_and(|at| Instant::now() >= at) {
            retry_at = None;
            provider.restart_polling();
            deliver_present_tags(&mut controller, &mut provider, &reader_states, &mut retry_at);
        }
    }
}

// Hands every present tag to the controller. One present tag proceeds into
// the session; several arm the retry deadline.
fn deliver_present_tags(
    controller: &mut SessionController,
    provider: &mut PcscProvider,
    reader_states: &[ReaderState],
    retry_at: &mut Option<Instant>,
) {
    if !controller.is_active() {
        return;
    }
    let tags: Vec<CString> = reader_states
        .iter()
        .skip(1)
        .filter(|rs| rs.current_state().intersects(State::PRESENT))
        .map(|rs| CString::from(rs.name()))
        .collect();
    if tags.is_empty() {
        return;
    }
    if let Some(delay) = controller.handle_tags_detected(provider, &tags) {
        *retry_at = Some(Instant::now() + delay);
    }
}

fn refresh(
    provider: &mut PcscProvider,
    readers_buf: &mut [u8],
    reader_states: &mut Vec<ReaderState>,
    sink: &EventSink,
    availability: &Arc<Mutex<Availability>>,
    controller: &mut SessionController,
) {
    provider.refresh_readers(readers_buf);

    // keep the PnP entry, rebuild the per-reader states
    reader_states.truncate(1);
    for name in provider.readers() {
        reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
    }

    let status = provider.check_availability();
    if let Ok(mut snapshot) = availability.lock() {
        *snapshot = status.clone();
    }
    sink.reader_status(status.available, &status.message);

    // a session polling on hardware that just went away has nothing to wait for
    if !status.available && controller.is_active() {
        controller.handle_tags_detected(provider, &[]);
    }
}
