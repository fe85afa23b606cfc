//! Human-readable digest of the stored context, injected into the system prompt
//! so the model does not ask again for data the conversation already holds.

use std::fmt::Write;

use portline_core::domain::context::{ContextKey, ContextMap};

pub const EMPTY_CONTEXT_PLACEHOLDER: &str =
    "No hay información previa disponible. Deberás recopilar todos los datos necesarios del usuario.";

const HEADER: &str = "=== INFORMACIÓN DISPONIBLE EN EL CONTEXTO ===";
const FOOTER: &str = "=== FIN DE INFORMACIÓN DISPONIBLE ===";

pub fn context_summary(context: &ContextMap) -> String {
    if context.is_empty() {
        return EMPTY_CONTEXT_PLACEHOLDER.to_string();
    }

    let mut out = String::new();
    line(&mut out, HEADER);
    line(&mut out, "");
    line(
        &mut out,
        "IMPORTANTE: Usa estos datos cuando estén disponibles. NO vuelvas a preguntar información que ya tienes.",
    );
    line(&mut out, "");

    if let Some(customer_id) = context.display(ContextKey::CustomerId) {
        line(&mut out, "DATOS DEL CLIENTE:");
        field(&mut out, context, "ID del cliente", ContextKey::CustomerId);
        field(&mut out, context, "Nombre completo", ContextKey::CustomerName);
        field(&mut out, context, "Nombre", ContextKey::CustomerFirstName);
        field(&mut out, context, "Apellido", ContextKey::CustomerLastName);
        field(&mut out, context, "Email", ContextKey::CustomerEmail);
        field(&mut out, context, "Teléfono", ContextKey::CustomerPhone);
        line(&mut out, &format!("Cliente REGISTRADO - Utiliza customer_id: {customer_id} en las tools"));
        line(&mut out, "");
    }

    if let Some(address_id) = context.display(ContextKey::AddressId) {
        line(&mut out, "DATOS DE DIRECCIÓN:");
        field(&mut out, context, "ID de dirección", ContextKey::AddressId);
        field(&mut out, context, "Calle", ContextKey::AddressStreet);
        field(&mut out, context, "Número", ContextKey::AddressNumber);
        field(&mut out, context, "Distrito", ContextKey::AddressDistrict);
        field(&mut out, context, "Código Postal", ContextKey::AddressPostalCode);
        field(&mut out, context, "Referencia", ContextKey::AddressReference);
        field(&mut out, context, "Dirección completa", ContextKey::AddressFull);
        line(&mut out, &format!("Dirección REGISTRADA - Utiliza address_id: {address_id} en las tools"));
        line(&mut out, "");
    }

    if let Some(order_id) = context.display(ContextKey::OrderId) {
        line(&mut out, "DATOS DE ORDEN:");
        field(&mut out, context, "ID de orden", ContextKey::OrderId);
        field(&mut out, context, "ID de producto", ContextKey::OrderProductId);
        field(&mut out, context, "Estado", ContextKey::OrderStatus);
        line(&mut out, &format!("Orden CREADA - Utiliza order_id: {order_id} para crear el checkout"));
        line(&mut out, "");
    }

    if context.contains(ContextKey::PortabilityId) {
        line(&mut out, "DATOS DE PORTABILIDAD:");
        field(&mut out, context, "ID de portabilidad", ContextKey::PortabilityId);
        field(&mut out, context, "Teléfono a portar", ContextKey::PortabilityPhone);
        field(&mut out, context, "Estado", ContextKey::PortabilityStatus);
        field(&mut out, context, "IMEI", ContextKey::PortabilityImei);
        field(&mut out, context, "NIP", ContextKey::PortabilityNip);
        let has_imei = context.contains(ContextKey::PortabilityImei);
        let has_nip = context.contains(ContextKey::PortabilityNip);
        if has_imei && has_nip {
            line(&mut out, "Portabilidad COMPLETA con IMEI y NIP");
        } else {
            line(&mut out, "FALTA INFORMACIÓN:");
            if !has_imei {
                line(&mut out, "    - Solicita el IMEI del dispositivo");
            }
            if !has_nip {
                line(&mut out, "    - Solicita el NIP de portabilidad");
            }
        }
        line(&mut out, "");
    }

    if context.contains(ContextKey::CheckoutSessionId) {
        line(&mut out, "DATOS DE PAGO:");
        field(&mut out, context, "ID de sesión de checkout", ContextKey::CheckoutSessionId);
        field(&mut out, context, "URL de pago", ContextKey::CheckoutSessionUrl);
        if context.bool(ContextKey::PaymentCompleted) == Some(true) {
            line(&mut out, "Pago COMPLETADO");
        } else {
            line(&mut out, "Pago PENDIENTE - Proporciona la URL al usuario");
        }
        line(&mut out, "");
    }

    if context.get(ContextKey::ImeiCompatible).is_some() {
        line(&mut out, "VERIFICACIÓN DE IMEI:");
        field(&mut out, context, "IMEI verificado", ContextKey::ImeiChecked);
        if context.bool(ContextKey::ImeiCompatible) == Some(true) {
            line(&mut out, "IMEI COMPATIBLE con la red");
        } else {
            line(&mut out, "IMEI NO COMPATIBLE con la red");
        }
        line(&mut out, "");
    }

    if context.contains(ContextKey::LastError) {
        line(&mut out, "INFORMACIÓN DE ERRORES:");
        field(&mut out, context, "Último error", ContextKey::LastError);
        field(&mut out, context, "Herramienta fallida", ContextKey::FailedTool);
        field(&mut out, context, "Contador de errores", ContextKey::ErrorCount);
        line(&mut out, "  El usuario puede estar reintentando una operación fallida");
        line(&mut out, "");
    }

    line(&mut out, FOOTER);
    out
}

fn line(out: &mut String, text: &str) {
    let _ = writeln!(out, "{text}");
}

fn field(out: &mut String, context: &ContextMap, label: &str, key: ContextKey) {
    let Some(value) = context.display(key) else { return };
    // ciphertext means nothing to the model
    let shown = if key.is_encrypted() { "registrado".to_string() } else { value };
    let _ = writeln!(out, "  - {label}: {shown}");
}
