use byteorder::{LittleEndian, WriteBytesExt};

use super::av_pair::{AvPair, MsvAvFlags};
use crate::channel_bindings::ChannelBindings;
use crate::crypto::des::{desl, lm_hash};
use crate::crypto::{compute_hmac_md5, compute_hmac_md5_parts, compute_md4, compute_md5_parts, HASH_SIZE};
use crate::ntlm::{CHALLENGE_SIZE, LM_CHALLENGE_RESPONSE_BUFFER_SIZE, MESSAGE_INTEGRITY_CHECK_SIZE};
use crate::utils::string_to_utf16;
use crate::Result;

const NT_V2_RESPONSE_BASE_SIZE: usize = 28;
const LM_PASSWORD_MAX_LEN: usize = 14;

/// `NTOWFv2`: HMAC-MD5 keyed by the NT hash over `UPPER(user) || domain` in UTF-16LE.
pub(crate) fn compute_ntlm_v2_hash(nt_hash: &[u8; HASH_SIZE], user: &str, domain: &str) -> Result<[u8; HASH_SIZE]> {
    let mut user_uppercase_with_domain = string_to_utf16(&user.to_uppercase());
    user_uppercase_with_domain.extend(string_to_utf16(domain));

    compute_hmac_md5(nt_hash, &user_uppercase_with_domain)
}

pub(crate) fn compute_lm_v2_response(
    client_challenge: &[u8; CHALLENGE_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
    ntlm_v2_hash: &[u8; HASH_SIZE],
) -> Result<[u8; LM_CHALLENGE_RESPONSE_BUFFER_SIZE]> {
    let proof = compute_hmac_md5_parts(ntlm_v2_hash, &[server_challenge, client_challenge])?;

    let mut lm_challenge_response = [0x00; LM_CHALLENGE_RESPONSE_BUFFER_SIZE];
    lm_challenge_response[..HASH_SIZE].copy_from_slice(&proof);
    lm_challenge_response[HASH_SIZE..].copy_from_slice(client_challenge);

    Ok(lm_challenge_response)
}

/// Returns the NTLMv2 response (`NTProofStr || blob`) and the session base key.
pub(crate) fn compute_ntlm_v2_response(
    client_challenge: &[u8; CHALLENGE_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
    target_info: &[u8],
    ntlm_v2_hash: &[u8; HASH_SIZE],
    timestamp: u64,
) -> Result<(Vec<u8>, [u8; HASH_SIZE])> {
    let mut ntlm_v2_temp = Vec::with_capacity(NT_V2_RESPONSE_BASE_SIZE + target_info.len() + 4);
    ntlm_v2_temp.write_u8(1)?; // RespType 1 byte
    ntlm_v2_temp.write_u8(1)?; // HighRespType 1 byte
    ntlm_v2_temp.write_u16::<LittleEndian>(0)?; // Reserved1 2 bytes
    ntlm_v2_temp.write_u32::<LittleEndian>(0)?; // Reserved2 4 bytes
    ntlm_v2_temp.write_u64::<LittleEndian>(timestamp)?; // Timestamp 8 bytes
    ntlm_v2_temp.extend_from_slice(client_challenge); // ClientChallenge 8 bytes
    ntlm_v2_temp.write_u32::<LittleEndian>(0)?; // Reserved3 4 bytes
    ntlm_v2_temp.extend_from_slice(target_info); // AV pairs ending with MsvAvEOL
    ntlm_v2_temp.write_u32::<LittleEndian>(0)?; // Reserved4 4 bytes

    let nt_proof = compute_hmac_md5_parts(ntlm_v2_hash, &[server_challenge, &ntlm_v2_temp])?;

    let mut nt_challenge_response = nt_proof.to_vec();
    nt_challenge_response.append(&mut ntlm_v2_temp);

    let session_base_key = compute_hmac_md5(ntlm_v2_hash, &nt_proof)?;

    Ok((nt_challenge_response, session_base_key))
}

/// NTLMv1 response without extended session security.
pub(crate) fn compute_ntlm_v1_response(
    nt_hash: &[u8; HASH_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
) -> Result<[u8; LM_CHALLENGE_RESPONSE_BUFFER_SIZE]> {
    desl(nt_hash, server_challenge)
}

/// LM response of NTLMv1, or `None` when the password has no LM hash.
pub(crate) fn compute_lm_v1_response(
    password: &str,
    server_challenge: &[u8; CHALLENGE_SIZE],
) -> Result<Option<[u8; LM_CHALLENGE_RESPONSE_BUFFER_SIZE]>> {
    if password.chars().count() > LM_PASSWORD_MAX_LEN || !password.is_ascii() {
        return Ok(None);
    }

    Ok(Some(desl(&lm_hash(password)?, server_challenge)?))
}

/// NTLMv1 with extended session security: the challenge is folded with the client
/// challenge and the LM response carries the client challenge.
pub(crate) fn compute_ntlm_v1_ess_response(
    nt_hash: &[u8; HASH_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
    client_challenge: &[u8; CHALLENGE_SIZE],
) -> Result<(
    [u8; LM_CHALLENGE_RESPONSE_BUFFER_SIZE],
    [u8; LM_CHALLENGE_RESPONSE_BUFFER_SIZE],
)> {
    let digest = compute_md5_parts(&[server_challenge, client_challenge]);
    let mut challenge = [0x00; CHALLENGE_SIZE];
    challenge.copy_from_slice(&digest[..CHALLENGE_SIZE]);

    let mut lm_challenge_response = [0x00; LM_CHALLENGE_RESPONSE_BUFFER_SIZE];
    lm_challenge_response[..CHALLENGE_SIZE].copy_from_slice(client_challenge);

    Ok((desl(nt_hash, &challenge)?, lm_challenge_response))
}

pub(crate) fn compute_ntlm_v1_session_base_key(nt_hash: &[u8; HASH_SIZE]) -> [u8; HASH_SIZE] {
    compute_md4(nt_hash)
}

/// `KXKEY` of NTLMv1 with extended session security.
pub(crate) fn compute_ntlm_v1_ess_key_exchange_key(
    session_base_key: &[u8; HASH_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
    lm_challenge_response: &[u8],
) -> Result<[u8; HASH_SIZE]> {
    let client_challenge = lm_challenge_response.get(..CHALLENGE_SIZE).unwrap_or_default();

    compute_hmac_md5_parts(session_base_key, &[server_challenge, client_challenge])
}

/// Target info sent back in the NTLMv2 blob: the server's pairs, the MIC flag when the
/// server sent a timestamp, the target SPN and the channel binding hash.
///
/// Returns the list and whether a MIC must be sent.
pub(crate) fn get_authenticate_target_info(
    server_target_info: &[u8],
    target_name: Option<&str>,
    channel_bindings: Option<&ChannelBindings>,
) -> Result<(Vec<u8>, bool)> {
    let mut av_pairs = AvPair::buffer_to_av_pairs(server_target_info)?;
    let use_mic = super::av_pair::find_timestamp(&av_pairs).is_some();

    if use_mic {
        let mut flags = MsvAvFlags::MESSAGE_INTEGRITY_CHECK.bits();
        av_pairs.retain(|av_pair| match av_pair {
            AvPair::Flags(value) => {
                flags |= value;
                false
            }
            _ => true,
        });
        av_pairs.push(AvPair::Flags(flags));
    }

    if let Some(target_name) = target_name {
        av_pairs.retain(|av_pair| !matches!(av_pair, AvPair::TargetName(_)));
        av_pairs.push(AvPair::TargetName(string_to_utf16(target_name)));
    }

    if let Some(channel_bindings) = channel_bindings {
        av_pairs.push(AvPair::ChannelBindings(channel_bindings.gss_hash()));
    }

    Ok((AvPair::list_to_buffer(&av_pairs)?, use_mic))
}

pub(crate) fn generate_signing_key(exported_session_key: &[u8], sign_magic: &[u8]) -> [u8; HASH_SIZE] {
    compute_md5_parts(&[exported_session_key, sign_magic])
}

pub(crate) fn compute_message_integrity_check(
    negotiate_message: &[u8],
    challenge_message: &[u8],
    authenticate_message: &[u8],
    exported_session_key: &[u8],
) -> Result<[u8; MESSAGE_INTEGRITY_CHECK_SIZE]> {
    compute_hmac_md5_parts(
        exported_session_key,
        &[negotiate_message, challenge_message, authenticate_message],
    )
}
