//! Assistant-authored texts: quota notices, usage warnings and the welcome
//! greeting shown before the first challenge exists.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::utils::ids::random_u64;

pub const UPGRADE_PLAN_OPEN: &str = "<upgrade-plan-button>";
pub const UPGRADE_PLAN_CLOSE: &str = "</upgrade-plan-button>";

const QUOTA_EXCEEDED_MESSAGES: &[&str] = &[
    "Seus tokens do plano {plan} acabaram por este ciclo. Que tal dar o próximo passo e continuar sua jornada de inovação?",
    "Ops! Você usou todos os tokens do plano {plan}. Atualize seu plano para seguir conversando com a Genie.",
    "Sua energia criativa superou o plano {plan}! Para continuar explorando startups, escolha um plano com mais tokens.",
    "Os tokens do plano {plan} chegaram ao fim. Desbloqueie mais conversas atualizando seu plano.",
    "Você aproveitou ao máximo o plano {plan}! Atualize agora e continue encontrando as startups certas para seu desafio.",
];

const WELCOME_MESSAGES: &[&str] = &[
    "Olá. Eu sou a Genie, sua agente de inovação aberta turbinada por IA! Crie agora um novo desafio e irei pesquisar em uma base de milhares de startups globais!",
    "Oi. Sou Genie, sua gênia IA do mundo da inovação! Vim aqui te conectar com milhares de startups. Descreva agora seu desafio!",
    "Bem-vindo! Sou a Genie, sua parceira em inovação. Vamos explorar juntos o universo das startups mais inovadoras do mundo?",
    "Olá! Como sua assistente de inovação, estou aqui para ajudar você a encontrar as melhores startups para seu desafio. Vamos começar?",
    "Oi! Sou Genie, sua guia no ecossistema global de startups. Pronta para transformar seu desafio em oportunidades!",
    "Prazer em conhecê-lo! Sou a Genie, especialista em conectar desafios corporativos com soluções inovadoras. Vamos criar seu primeiro desafio?",
    "Olá! Como sua consultora de inovação digital, estou aqui para ajudar você a descobrir startups incríveis. Vamos começar?",
    "Bem-vindo ao futuro da inovação! Sou a Genie, e vou ajudar você a encontrar as startups mais promissoras para seu negócio.",
    "Oi! Sou sua parceira Genie, especializada em matchmaking entre empresas e startups. Pronta para começar essa jornada?",
    "Olá! Como sua mentora em inovação aberta, estou aqui para guiar você pelo ecossistema global de startups. Vamos criar seu desafio?",
    "Bem-vindo! Sou a Genie, sua conexão com o mundo das startups. Vamos transformar seus desafios em oportunidades de inovação?",
    "Oi! Como sua consultora Genie, estou aqui para ajudar você a navegar pelo universo das startups. Pronta para começar?",
    "Olá! Sou a Genie, sua especialista em inovação. Vamos descobrir juntos as startups que podem revolucionar seu negócio?",
    "Bem-vindo ao hub de inovação! Sou a Genie, e estou aqui para conectar você com as startups mais disruptivas do mercado.",
];

/// Chooses one entry out of `len`. Injected so tests can pin the choice.
pub trait MessagePicker: Send + Sync {
    fn pick(&self, len: usize) -> usize;
}

#[derive(Debug, Default)]
pub struct RandomPick {
    fallback: AtomicUsize,
}

impl MessagePicker for RandomPick {
    fn pick(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        match random_u64() {
            Some(n) => (n % len as u64) as usize,
            None => self.fallback.fetch_add(1, Ordering::Relaxed) % len,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FixedPick(pub usize);

impl MessagePicker for FixedPick {
    fn pick(&self, len: usize) -> usize {
        if len == 0 { 0 } else { self.0 % len }
    }
}

fn upgrade_button(label: &str) -> String {
    format!("{UPGRADE_PLAN_OPEN}{label}{UPGRADE_PLAN_CLOSE}")
}

/// Assistant message posted when a charge is rejected.
pub fn quota_exceeded(picker: &dyn MessagePicker, plan: &str) -> String {
    let template = QUOTA_EXCEEDED_MESSAGES[picker.pick(QUOTA_EXCEEDED_MESSAGES.len())];
    format!(
        "{}\n\n{}",
        template.replace("{plan}", plan),
        upgrade_button("Atualizar Plano")
    )
}

/// Assistant message posted when usage enters the warning band.
pub fn usage_warning(percentage: f64) -> String {
    // Halves round up: 70.5 shows as 71.
    let shown = percentage.round() as u64;
    format!(
        "Atenção! Você já utilizou {shown}% dos seus tokens disponíveis. Considere atualizar seu plano para continuar inovando sem interrupções!\n\n{}",
        upgrade_button("Ver Planos")
    )
}

pub fn welcome(picker: &dyn MessagePicker) -> &'static str {
    WELCOME_MESSAGES[picker.pick(WELCOME_MESSAGES.len())]
}

/// Prompt sent to the agent after the user rewrites a challenge.
pub fn revised_challenge_prompt(title: &str, description: &str) -> String {
    format!(
        "Genie, tenho uma nova abordagem para o desafio {title} e parcebi algo novo: {description}. \
         Analise todo histórico de conversa deste chat e as startups que foram indicadas nos statupList, \
         e faça um questionamento técnico, operacional ou de novas tecnologias, que seja bem pertinente para que \
         eu encontre uma startupList para meu desafio. Faça apenas questionamentos embasados, sem levantar \
         fatos. Seja bem humorada em sua introdução"
    )
}
