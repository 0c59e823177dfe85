//! Customer-facing texts and transfer reasons.

use std::fmt;

use serde::Serialize;

pub const UNEXPECTED_MESSAGE: &str = "Recebemos sua mensagem, mas o envio deste mês já foi confirmado. \
Deseja falar com um de nossos atendentes? Responda SIM ou NÃO.";

pub const ASK_FOR_ATTENDANT: &str =
    "Certo! Vou transferir você para um de nossos atendentes. Aguarde um momento, por favor.";

pub const DONT_NEED_ATTENDANT: &str =
    "Tudo bem! Se precisar de algo, é só nos chamar. Tenha um ótimo dia!";

pub const RETRY_ASK_FOR_ATTENDANT: &str =
    "Não consegui entender. Você deseja falar com um atendente? Responda SIM ou NÃO.";

pub const MESSAGE_CONFIRMED: &str = "Recebimento confirmado! Obrigado e tenha um ótimo dia.";

pub const NEGATIVE_RESPONSE: &str =
    "Tudo bem, não enviaremos as guias pendentes. Qualquer dúvida estamos à disposição.";

pub const NOT_TEXT_MESSAGE_RECEIVED: &str = "Recebi um documento, imagem ou figurinha, mas só consigo \
entender mensagens de texto. Por favor, responda por escrito.";

pub const ASK_ASSISTANCE: &str =
    "Sua solicitação foi encaminhada para um de nossos atendentes. Em breve entraremos em contato.";

pub const BASE_ERROR_MESSAGE: &str = "Desculpe, não entendi sua resposta.";

pub const HAS_DEBITS_ERROR_COMPLETION: &str = " Identificamos guias em aberto na sua empresa. \
Responda SIM para confirmar o recebimento ou NÃO se não quiser receber as guias pendentes.";

pub const NO_DEBIT_ERROR_COMPLETION: &str =
    " Por favor, confirme o recebimento respondendo SIM, OK ou RECEBI.";

pub const ATTENDANT_ERROR_COMPLETION: &str =
    " Se preferir falar com uma pessoa, digite ATENDENTE.";

pub const VISUALIZE_REMINDER: &str =
    "Olá, preciso que visualize ou confirme a mensagem para encerrar este envio.";

pub const AUDIT_REPORT_HEADER: &str = "MEI's SEM CONFIRMAÇÃO DE RECEBIMENTO DAS:\n\n";

const SUGGEST: &str =
    "Qualquer dúvida ou sugestão entre em contato através do WhatsApp: https://wa.me/5588988412833.";

/// Opening message of a monthly outreach for the document of `period_label`.
pub fn greeting(period_label: &str) -> String {
    format!(
        "Olá, espero que esteja bem.\n\
         Gostaria de informar que seu Documento de Arrecadação Simplificado (DAS) \
         período ({period_label}) está disponível, irei enviá-lo em seguida.\n\
         Lembrando que é importante que o pagamento seja realizado \
         dentro do prazo estipulado para evitar juros e multa."
    )
}

/// Closing message asking the customer to confirm receipt.
pub fn disclaimer() -> String {
    format!(
        "{SUGGEST}\n\nPor favor, preciso que confirme o recebimento desta mensagem.\n\
         Responda SIM, OK, ou RECEBI por gentileza."
    )
}

/// Notice listing outstanding periods, sent instead of the disclaimer.
pub fn pendencies_notice(periods: &[String]) -> String {
    format!(
        "Identificamos que sua empresa possui guias em aberto referentes a: {}.\n\n\
         Responda SIM para confirmar o recebimento desta mensagem ou NÃO caso não queira \
         receber as guias pendentes.\n\n{SUGGEST}",
        periods.join(", ")
    )
}

/// Escalating error message for a reply the machine could not understand.
pub fn error_message(retries: i64, pendencies: bool) -> String {
    let mut text = String::from(BASE_ERROR_MESSAGE);
    text.push_str(if pendencies {
        HAS_DEBITS_ERROR_COMPLETION
    } else {
        NO_DEBIT_ERROR_COMPLETION
    });
    if retries >= 2 {
        text.push_str(ATTENDANT_ERROR_COMPLETION);
    }
    text
}

/// Why a conversation was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    AskForAttendant,
    ExceededRetries,
}

impl TransferReason {
    pub fn code(self) -> &'static str {
        match self {
            TransferReason::AskForAttendant => "ask_for_attendant",
            TransferReason::ExceededRetries => "exceeded_retries",
        }
    }

    /// Wording used in the operations alert.
    pub fn describe(self) -> &'static str {
        match self {
            TransferReason::AskForAttendant => "Cliente solicitou atendimento",
            TransferReason::ExceededRetries => "Número máximo de tentativas excedido",
        }
    }
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Alert posted to the operations channel when a ticket is transferred.
pub fn transfer_alert(customer: &str, reason: TransferReason, protocol: &str) -> String {
    format!(
        "O cliente: {customer}\nSOLICITA ATENDIMENTO\n\nMotivo: {}\n\nProtocolo: {protocol}",
        reason.describe()
    )
}
